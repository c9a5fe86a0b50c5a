//! Host bridge link enable and chip reset
//!
//! The E16G301 east link has to be switched to cclk/4 before the host can
//! talk to the mesh reliably. The bridge is put into a mode where the next
//! transaction is routed out of the link core itself, that core's
//! `ELINKMODECFG` is written, and the bridge goes back to normal routing.
//! Nothing is read on the way: a read through a half-configured link hangs.

use std::thread;
use std::time::Duration;

use epiphany_chip::regs::{elinkmodecfg, ELINKMODECFG};
use epiphany_chip::sys::{esysconfig, ESYSCONFIG, ESYSRESET};
use epiphany_chip::{Chip, LinkDirection};

use crate::error::Result;
use crate::mmio::HwBackend;
use crate::system::SystemRegs;

/// Direction of the host bridge on supported boards
pub const HOST_LINK: LinkDirection = LinkDirection::East;

/// Settle time after `ESYSRESET`
pub const RESET_SETTLE: Duration = Duration::from_millis(200);

/// Enable the host link of `chip`.
///
/// Issues exactly three stores with a fence after each of the first two:
/// `ESYSCONFIG` routing mode, the link core's `ELINKMODECFG`, `ESYSCONFIG`
/// cleared. Chips without the explicit enable sequence are left alone.
///
/// # Errors
///
/// Returns an error if a register lies outside the mapped windows.
pub fn link_up<B: HwBackend + ?Sized>(backend: &mut B, sys: &SystemRegs, chip: &Chip) -> Result<()> {
    if !chip.kind().needs_link_enable() {
        tracing::debug!("{} needs no link enable", chip.kind());
        return Ok(());
    }

    let link_core = chip.link_core(HOST_LINK)?;
    let mode = esysconfig::TRANS_CTRL_MODE.set(0, HOST_LINK.routing_mask());
    tracing::debug!("Enabling {HOST_LINK:?} link through core {link_core}");

    backend.write32(sys.addr(ESYSCONFIG), mode)?;
    backend.fence();
    backend.write32(
        link_core.regs_base() + ELINKMODECFG,
        elinkmodecfg::LCLK.set(0, elinkmodecfg::LCLK_DIV4),
    )?;
    backend.fence();
    backend.write32(sys.addr(ESYSCONFIG), 0)?;

    tracing::info!("Link up ({} @ {})", chip.kind(), chip.origin());
    Ok(())
}

/// Full chip reset: assert `ESYSRESET`, wait [`RESET_SETTLE`], enable the link.
///
/// # Errors
///
/// Returns an error if a register lies outside the mapped windows.
pub fn reset<B: HwBackend + ?Sized>(backend: &mut B, sys: &SystemRegs, chip: &Chip) -> Result<()> {
    tracing::info!("Resetting {chip}");
    backend.write32(sys.addr(ESYSRESET), 0)?;
    backend.fence();
    thread::sleep(RESET_SETTLE);
    link_up(backend, sys, chip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::map_grid;
    use crate::mmio::mock::{Event, MockBackend, Store};
    use crate::system::map_system_registers;
    use epiphany_chip::sys::SYS_BASE;
    use epiphany_chip::ChipKind;

    fn setup(chip: &Chip) -> (MockBackend, SystemRegs) {
        let mut mock = MockBackend::new();
        let sys = map_system_registers(&mut mock, SYS_BASE).unwrap();
        map_grid(&mut mock, chip.rect(), Some(SYS_BASE)).unwrap();
        mock.clear_events();
        (mock, sys)
    }

    #[test]
    fn three_writes_in_order_no_read() {
        let chip = Chip::parallella(ChipKind::E16G301);
        let (mut mock, sys) = setup(&chip);
        link_up(&mut mock, &sys, &chip).unwrap();

        let store = |addr, value| {
            Event::Write(Store {
                addr,
                width: 4,
                value,
            })
        };
        assert_eq!(
            mock.events(),
            vec![
                store(0x808F_0F00, 0x5000_0000),
                Event::Fence,
                store(0x88BF_0300, 1),
                Event::Fence,
                store(0x808F_0F00, 0),
            ]
        );
    }

    #[test]
    fn e64_link_is_noop() {
        let chip = Chip::parallella(ChipKind::E64G401);
        let (mut mock, sys) = setup(&chip);
        link_up(&mut mock, &sys, &chip).unwrap();
        assert!(mock.events().is_empty());
    }

    #[test]
    fn unmapped_link_core_fails() {
        let chip = Chip::parallella(ChipKind::E16G301);
        let mut mock = MockBackend::new();
        let sys = map_system_registers(&mut mock, SYS_BASE).unwrap();
        assert!(link_up(&mut mock, &sys, &chip).is_err());
    }

    #[test]
    fn reset_precedes_link_up() {
        let chip = Chip::parallella(ChipKind::E16G301);
        let (mut mock, sys) = setup(&chip);
        reset(&mut mock, &sys, &chip).unwrap();
        let writes = mock.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0].addr, 0x808F_0F04);
        assert_eq!(writes[1].value, 0x5000_0000);
    }
}
