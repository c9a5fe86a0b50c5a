//! Bootstrap sequence tests against the recording backend
//!
//! Every step's failure must unwind the steps before it, teardown must
//! release in exact reverse order, and firmware must land in every core.

use std::io::Write;

use epiphany_hal::chip::sys::{ESYSINFO, SYS_BASE};
use epiphany_hal::chip::{ChipKind, CoreId};
use epiphany_hal::mmio::mock::{Event, MockBackend, Store};
use epiphany_hal::mmio::Placement;
use epiphany_hal::{BootState, EhalError, Session, SessionConfig};

/// Backend reporting a Parallella E16 board.
fn parallella() -> MockBackend {
    let mock = MockBackend::new();
    mock.poke32(SYS_BASE + ESYSINFO, 0x0001_0201);
    mock
}

fn start(mock: &MockBackend) -> epiphany_hal::Result<Session<MockBackend>> {
    Session::start(SessionConfig::default(), mock.clone())
}

/// Collapse the event log into coarse step names.
fn steps(events: &[Event]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for e in events {
        let step = match e {
            Event::Map { region, .. } if region.starts_with("core") => "map core".to_string(),
            Event::Map { region, .. } => format!("map {region}"),
            Event::Unmap { base, .. } if *base == SYS_BASE => "unmap system registers".into(),
            Event::Unmap { base, .. } if *base == 0x8E00_0000 => "unmap shared memory".into(),
            Event::Unmap { .. } => "unmap core".into(),
            Event::Advise { .. } => "advise".into(),
            Event::Read { .. } => "read".into(),
            Event::Write(_) => "write".into(),
            Event::Fence => "fence".into(),
            Event::Close => "close".into(),
        };
        if out.last() != Some(&step) || !step.ends_with("core") {
            out.push(step);
        }
    }
    out
}

#[test]
fn full_bootstrap_order() {
    let mock = parallella();
    let session = start(&mock).unwrap();
    assert_eq!(session.state(), BootState::Ready);

    assert_eq!(
        steps(&mock.events()),
        vec![
            "map system registers",
            "read",
            "map core",
            "write",
            "fence",
            "write",
            "fence",
            "write",
            "map shared memory",
        ]
    );

    // 16 banks plus 15 register windows; the origin core's registers are the
    // system page.
    let core_maps = mock
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Map { region, placement: Placement::NoReplace, .. } if region.starts_with("core")))
        .count();
    assert_eq!(core_maps, 31);
}

#[test]
fn link_writes_follow_platform_read() {
    let mock = parallella();
    let _session = start(&mock).unwrap();
    let events = mock.events();
    let first_write = events
        .iter()
        .position(|e| matches!(e, Event::Write(_)))
        .unwrap();
    // The only read is ESYSINFO, long before the link sequence.
    let reads: Vec<&Event> = events.iter().filter(|e| matches!(e, Event::Read { .. })).collect();
    assert_eq!(reads, vec![&Event::Read { addr: 0x808F_0F08, width: 4 }]);
    assert!(matches!(events[first_write - 1], Event::Map { .. }));
    assert_eq!(
        mock.writes(),
        vec![
            Store { addr: 0x808F_0F00, width: 4, value: 0x5000_0000 },
            Store { addr: 0x88BF_0300, width: 4, value: 1 },
            Store { addr: 0x808F_0F00, width: 4, value: 0 },
        ]
    );
}

#[test]
fn teardown_reverses_and_is_idempotent() {
    let mock = parallella();
    let mut session = start(&mock).unwrap();
    mock.clear_events();

    session.teardown();
    assert_eq!(session.state(), BootState::Closed);
    assert_eq!(
        steps(&mock.events()),
        vec!["unmap shared memory", "unmap core", "unmap system registers", "close"]
    );
    assert!(mock.mapped().is_empty());

    let before = mock.events().len();
    session.teardown();
    drop(session);
    assert_eq!(mock.events().len(), before);
}

#[test]
fn drop_tears_down() {
    let mock = parallella();
    drop(start(&mock).unwrap());
    assert!(mock.is_closed());
    assert!(mock.mapped().is_empty());
}

#[test]
fn system_page_failure_closes_device() {
    let mock = parallella().with_map_failure(SYS_BASE);
    let err = start(&mock).unwrap_err();
    assert!(matches!(err, EhalError::Map { .. }));
    assert_eq!(steps(&mock.events()), vec!["map system registers", "close"]);
}

#[test]
fn grid_failure_unwinds() {
    // Bank of core [33, 9]
    let mock = parallella().with_map_failure(0x8490_0000);
    let err = start(&mock).unwrap_err();
    match err {
        EhalError::Map { region, .. } => assert!(region.contains("[33, 9]")),
        other => panic!("unexpected {other:?}"),
    }
    let steps = steps(&mock.events());
    assert_eq!(
        steps[steps.len() - 3..],
        ["unmap core", "unmap system registers", "close"]
    );
    assert!(mock.mapped().is_empty());
    assert!(mock.writes().is_empty());
}

#[test]
fn link_failure_unwinds() {
    let mock = parallella().with_write_failure(0x88BF_0300);
    assert!(start(&mock).is_err());
    let steps = steps(&mock.events());
    assert!(!steps.iter().any(|s| s == "map shared memory"));
    assert_eq!(
        steps[steps.len() - 3..],
        ["unmap core", "unmap system registers", "close"]
    );
    assert!(mock.mapped().is_empty());
}

#[test]
fn shared_memory_failure_unwinds() {
    let mock = parallella().with_map_failure(0x8E00_0000);
    let err = start(&mock).unwrap_err();
    match err {
        EhalError::Map { region, .. } => assert_eq!(region, "shared memory"),
        other => panic!("unexpected {other:?}"),
    }
    let steps = steps(&mock.events());
    assert!(!steps.iter().any(|s| s == "unmap shared memory"));
    assert_eq!(steps.last().map(String::as_str), Some("close"));
    assert!(mock.mapped().is_empty());
}

#[test]
fn huge_page_fallback_is_not_an_error() {
    let mock = parallella().without_huge_pages().without_hugepage_advice();
    let session = start(&mock).unwrap();
    let shm = session.shared_memory().unwrap();
    assert!(!shm.huge_pages());
    assert!(mock.is_mapped(0x8FFF_FFFF));
}

#[test]
fn e64_board_skips_link_enable() {
    let mock = MockBackend::new();
    mock.poke32(SYS_BASE + ESYSINFO, 0x0000_0105);
    let session = start(&mock).unwrap();
    assert_eq!(session.chip().kind(), ChipKind::E64G401);
    assert!(mock.writes().is_empty());
}

#[test]
fn srec_reaches_every_core() {
    let mock = parallella();
    let mut session = start(&mock).unwrap();

    let mut image = tempfile::Builder::new().suffix(".srec").tempfile().unwrap();
    image
        .write_all(b"S00600004844521B\nS311000000580B6EE2000B600210520D00005F\nS70500000000FA\n")
        .unwrap();
    let stats = session.load_srec(image.path()).unwrap();
    assert_eq!(stats.data_records, 1);
    assert_eq!(stats.bytes_written, 12 * 16);
    assert_eq!(stats.entry, Some(0));

    let expected = [0x0B, 0x6E, 0xE2, 0x00, 0x0B, 0x60, 0x02, 0x10, 0x52, 0x0D, 0x00, 0x00];
    for core in session.chip().rect().iter() {
        assert_eq!(mock.peek_bytes(core.bank_base() + 0x58, 12), expected, "core {core}");
    }
}

#[test]
fn srec_into_sub_rectangle() {
    let mock = parallella();
    let mut session = start(&mock).unwrap();
    let rect = epiphany_hal::chip::GridRect::new(
        CoreId::new(33, 9).unwrap(),
        CoreId::new(33, 10).unwrap(),
    )
    .unwrap();

    let mut image = tempfile::Builder::new().suffix(".s37").tempfile().unwrap();
    image
        .write_all(b"S311000000580B6EE2000B600210520D00005F\n")
        .unwrap();
    let stats = session.load_srec_into(image.path(), rect).unwrap();
    assert_eq!(stats.bytes_written, 24);
    assert_eq!(mock.peek_bytes(0x8490_0058, 1), vec![0x0B]);
    assert_eq!(mock.peek_bytes(0x8480_0058, 1), vec![0x00]);

    let outside = epiphany_hal::chip::GridRect::new(
        CoreId::new(35, 11).unwrap(),
        CoreId::new(36, 12).unwrap(),
    )
    .unwrap();
    assert!(matches!(
        session.load_srec_into(image.path(), outside),
        Err(EhalError::Config { .. })
    ));
}
