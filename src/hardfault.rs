//! # Hard-fault diagnostics (supplemented, ambient)
//!
//! Grounded on `utils/hardfault.c`'s `HardFault_Handler`/
//! `HardFault_HandlerC` split: a naked asm trampoline recovers the
//! correct stack pointer (MSP or PSP, tested via `EXC_RETURN` bit 2,
//! the same idiom [`crate::arch::cortex_m4::SVCall`] uses) and hands
//! it to a plain Rust function that reads the stacked registers plus
//! the fault status registers, logs them, and traps the debugger.

use crate::task::StackFrame;

/// The eight hardware-stacked registers visible at the fault, plus the
/// Cortex-M4 fault status/address registers read directly from their
/// fixed addresses in the System Control Block.
#[derive(Debug, Clone, Copy)]
pub struct FaultReport {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
    /// Configurable Fault Status Register (MMSR/BFSR/UFSR packed).
    pub cfsr: u32,
    /// HardFault Status Register.
    pub hfsr: u32,
    /// Debug Fault Status Register.
    pub dfsr: u32,
    /// Auxiliary Fault Status Register.
    pub afsr: u32,
    /// MemManage Fault Address Register. Only meaningful if `cfsr`'s
    /// MMARVALID bit is set.
    pub mmar: u32,
    /// Bus Fault Address Register. Only meaningful if `cfsr`'s
    /// BFARVALID bit is set.
    pub bfar: u32,
}

#[cfg(all(target_os = "none", target_arch = "arm"))]
const CFSR: *const u32 = 0xE000_ED28 as *const u32;
#[cfg(all(target_os = "none", target_arch = "arm"))]
const HFSR: *const u32 = 0xE000_ED2C as *const u32;
#[cfg(all(target_os = "none", target_arch = "arm"))]
const DFSR: *const u32 = 0xE000_ED30 as *const u32;
#[cfg(all(target_os = "none", target_arch = "arm"))]
const AFSR: *const u32 = 0xE000_ED3C as *const u32;
#[cfg(all(target_os = "none", target_arch = "arm"))]
const MMAR: *const u32 = 0xE000_ED34 as *const u32;
#[cfg(all(target_os = "none", target_arch = "arm"))]
const BFAR: *const u32 = 0xE000_ED38 as *const u32;

/// Read the six SCB fault status/address registers. Split out from
/// [`FaultReport::capture`] so host builds (no System Control Block to
/// read) can stand in a zeroed reading instead of dereferencing a
/// fixed ARM peripheral address that doesn't exist on the host.
#[cfg(all(target_os = "none", target_arch = "arm"))]
fn read_fault_status_registers() -> (u32, u32, u32, u32, u32, u32) {
    unsafe {
        (
            core::ptr::read_volatile(CFSR),
            core::ptr::read_volatile(HFSR),
            core::ptr::read_volatile(DFSR),
            core::ptr::read_volatile(AFSR),
            core::ptr::read_volatile(MMAR),
            core::ptr::read_volatile(BFAR),
        )
    }
}

#[cfg(not(all(target_os = "none", target_arch = "arm")))]
fn read_fault_status_registers() -> (u32, u32, u32, u32, u32, u32) {
    (0, 0, 0, 0, 0, 0)
}

impl FaultReport {
    /// Build a report from the eight hardware-stacked words left by
    /// the faulting exception entry (same layout as the leading half
    /// of [`StackFrame`]) plus a live read of the fault status
    /// registers.
    ///
    /// # Safety
    /// `stacked` must point at a valid, eight-word hardware exception
    /// frame (r0, r1, r2, r3, r12, lr, pc, psr, in that order).
    pub unsafe fn capture(stacked: *const u32) -> Self {
        let (cfsr, hfsr, dfsr, afsr, mmar, bfar) = read_fault_status_registers();
        Self {
            r0: *stacked,
            r1: *stacked.add(1),
            r2: *stacked.add(2),
            r3: *stacked.add(3),
            r12: *stacked.add(4),
            lr: *stacked.add(5),
            pc: *stacked.add(6),
            psr: *stacked.add(7),
            cfsr,
            hfsr,
            dfsr,
            afsr,
            mmar,
            bfar,
        }
    }
}

const _: () = assert!(core::mem::size_of::<[u32; 8]>() * 2 == core::mem::size_of::<StackFrame>());

/// Log a captured fault report at error level, then halt.
///
/// Called from [`crate::arch::cortex_m4::HardFault`]'s asm
/// trampoline with the recovered stack pointer. Never returns — a
/// hard fault is not recoverable in this kernel (no `Non-goals` item
/// walks it back to a running task), matching the original's
/// `__breakpoint(0)` ending.
pub fn report_and_halt(stacked: *const u32) -> ! {
    let report = unsafe { FaultReport::capture(stacked) };
    log::error!(
        "hardfault: pc={:#010x} lr={:#010x} psr={:#010x} cfsr={:#010x} hfsr={:#010x} bfar={:#010x} mmar={:#010x}",
        report.pc,
        report.lr,
        report.psr,
        report.cfsr,
        report.hfsr,
        report.bfar,
        report.mmar,
    );
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    cortex_m::asm::bkpt();
    loop {
        #[cfg(all(target_os = "none", target_arch = "arm"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_os = "none", target_arch = "arm")))]
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_reads_stacked_registers_in_order() {
        let frame: [u32; 8] = [10, 11, 12, 13, 14, 15, 16, 17];
        let report = unsafe { FaultReport::capture(frame.as_ptr()) };
        assert_eq!(report.r0, 10);
        assert_eq!(report.r3, 13);
        assert_eq!(report.r12, 14);
        assert_eq!(report.lr, 15);
        assert_eq!(report.pc, 16);
        assert_eq!(report.psr, 17);
    }
}
