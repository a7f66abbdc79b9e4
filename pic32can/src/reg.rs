//! Register map of the CAN module
//!
//! Every special function register of the module occupies 16 bytes: the
//! register itself followed by its `CLR`, `SET` and `INV` aliases. Writing a
//! mask to an alias clears, sets or inverts the masked bits without a
//! read-modify-write cycle, which is what makes most of the driver's register
//! accesses safe to interleave with the interrupt handler.

use core::marker::PhantomData;
use pic32can_core::CanId;
use vcell::VolatileCell;

const CLR: usize = 0x4;
const SET: usize = 0x8;

/// Special function registers of a CAN module.
///
/// Indexed registers carry the index of the mask, filter control word,
/// filter or FIFO they refer to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    /// `CxCON` module control
    Con,
    /// `CxCFG` baud rate configuration
    Cfg,
    /// `CxINT` interrupt flags and enables
    Int,
    /// `CxVEC` interrupt code
    Vec,
    /// `CxTREC` transmit/receive error counters and status
    Trec,
    /// `CxTMR` timestamp timer
    Tmr,
    /// `CxRXMn` acceptance filter mask
    RxM(usize),
    /// `CxFLTCONn` filter control (four filters per register)
    FltCon(usize),
    /// `CxRXFn` acceptance filter
    RxF(usize),
    /// `CxFIFOBA` message buffer base address
    FifoBa,
    /// `CxFIFOCONn` FIFO control
    FifoCon(usize),
    /// `CxFIFOINTn` FIFO interrupt flags and enables
    FifoInt(usize),
    /// `CxFIFOUAn` FIFO user address
    FifoUa(usize),
    /// `CxFIFOCIn` FIFO message index
    FifoCi(usize),
}

impl Reg {
    /// Byte offset of the register from the start of the register block.
    pub const fn offset(self) -> usize {
        match self {
            Reg::Con => 0x000,
            Reg::Cfg => 0x010,
            Reg::Int => 0x020,
            Reg::Vec => 0x030,
            Reg::Trec => 0x040,
            Reg::Tmr => 0x070,
            Reg::RxM(n) => 0x080 + 0x10 * n,
            Reg::FltCon(n) => 0x0c0 + 0x10 * n,
            Reg::RxF(n) => 0x140 + 0x10 * n,
            Reg::FifoBa => 0x340,
            Reg::FifoCon(n) => 0x350 + 0x40 * n,
            Reg::FifoInt(n) => 0x360 + 0x40 * n,
            Reg::FifoUa(n) => 0x370 + 0x40 * n,
            Reg::FifoCi(n) => 0x380 + 0x40 * n,
        }
    }
}

/// Access to the register block of a CAN module.
///
/// [`Mmio`] is the implementation used on target. The trait exists so that
/// the driver logic can run against a simulated module.
pub trait RegisterAccess {
    /// Reads the register.
    fn read(&self, reg: Reg) -> u32;
    /// Overwrites the register.
    fn write(&self, reg: Reg, value: u32);
    /// Clears the bits of `mask` through the `CLR` alias.
    fn clear_bits(&self, reg: Reg, mask: u32);
    /// Sets the bits of `mask` through the `SET` alias.
    fn set_bits(&self, reg: Reg, mask: u32);

    /// Read-modify-write of a register.
    fn modify<F: FnOnce(u32) -> u32>(&self, reg: Reg, f: F) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

/// Memory mapped register block of the CAN module identified by `P`.
pub struct Mmio<P> {
    _peripheral: PhantomData<P>,
}

impl<P: CanId> Mmio<P> {
    /// # Safety
    /// The caller must be the owner of the peripheral referenced by `P`, as
    /// witnessed by a [`Dependencies`](pic32can_core::Dependencies) instance.
    /// Do not keep more than one instance per peripheral.
    pub unsafe fn new() -> Self {
        Self {
            _peripheral: PhantomData,
        }
    }

    fn cell(&self, reg: Reg, alias: usize) -> &VolatileCell<u32> {
        // Safety: `P::ADDRESS` points to the start of the register block and all
        // offsets produced by `Reg` stay within it.
        unsafe {
            &*((P::ADDRESS as *const u8).add(reg.offset() + alias) as *const VolatileCell<u32>)
        }
    }
}

impl<P: CanId> RegisterAccess for Mmio<P> {
    fn read(&self, reg: Reg) -> u32 {
        self.cell(reg, 0).get()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.cell(reg, 0).set(value)
    }

    fn clear_bits(&self, reg: Reg, mask: u32) {
        self.cell(reg, CLR).set(mask)
    }

    fn set_bits(&self, reg: Reg, mask: u32) {
        self.cell(reg, SET).set(mask)
    }
}

/// `CxCON` fields
pub mod con {
    /// Request operation mode
    pub const REQOP_POS: u32 = 24;
    /// Request operation mode
    pub const REQOP_MASK: u32 = 0x0700_0000;
    /// Current operation mode
    pub const OPMOD_POS: u32 = 21;
    /// Current operation mode
    pub const OPMOD_MASK: u32 = 0x00e0_0000;
    /// Timestamp capture enable
    pub const CANCAP: u32 = 1 << 20;
    /// Module on
    pub const ON: u32 = 1 << 15;
}

/// `CxCFG` fields
pub mod cfg {
    /// Baud rate prescaler
    pub const BRP_MASK: u32 = 0x3f;
    /// Synchronization jump width
    pub const SJW_POS: u32 = 6;
    /// Synchronization jump width
    pub const SJW_MASK: u32 = 0xc0;
    /// Propagation segment
    pub const PRSEG_POS: u32 = 8;
    /// Propagation segment
    pub const PRSEG_MASK: u32 = 0x700;
    /// Phase segment 1
    pub const SEG1PH_POS: u32 = 11;
    /// Phase segment 1
    pub const SEG1PH_MASK: u32 = 0x3800;
    /// Sample the bus three times
    pub const SAM: u32 = 1 << 14;
    /// Phase segment 2 is freely programmable
    pub const SEG2PHTS: u32 = 1 << 15;
    /// Phase segment 2
    pub const SEG2PH_POS: u32 = 16;
    /// Phase segment 2
    pub const SEG2PH_MASK: u32 = 0x7_0000;
}

/// `CxINT` fields
pub mod int {
    /// Receive buffer interrupt flag
    pub const RBIF: u32 = 1 << 0;
    /// Transmit buffer interrupt flag
    pub const TBIF: u32 = 1 << 1;
    /// System error interrupt flag
    pub const SERRIF: u32 = 1 << 12;
    /// CAN bus error interrupt flag
    pub const CERRIF: u32 = 1 << 13;
    /// Invalid message received interrupt flag
    pub const IVRIF: u32 = 1 << 15;
    /// Receive buffer interrupt enable
    pub const RBIE: u32 = 1 << 16;
    /// Transmit buffer interrupt enable
    pub const TBIE: u32 = 1 << 17;
    /// System error interrupt enable
    pub const SERRIE: u32 = 1 << 28;
    /// CAN bus error interrupt enable
    pub const CERRIE: u32 = 1 << 29;
    /// Invalid message received interrupt enable
    pub const IVRIE: u32 = 1 << 31;

    /// Flags of the interrupts treated as errors
    pub const ERROR_FLAGS: u32 = SERRIF | CERRIF | IVRIF;
    /// Enables of the interrupts treated as errors
    pub const ERROR_ENABLES: u32 = SERRIE | CERRIE | IVRIE;
}

/// `CxVEC` fields
pub mod vec {
    /// Interrupt code, the FIFO number for FIFO interrupts
    pub const ICOD_MASK: u32 = 0x7f;
}

/// `CxTREC` fields
pub mod trec {
    /// Receive error counter
    pub const RERRCNT_MASK: u32 = 0xff;
    /// Transmit error counter
    pub const TERRCNT_POS: u32 = 8;
    /// Transmit error counter
    pub const TERRCNT_MASK: u32 = 0xff00;
    /// All error state bits, `EWARN` through `TXBO`
    pub const STATUS_MASK: u32 = 0x3f_0000;
}

/// `CxTMR` fields
pub mod tmr {
    /// Timestamp timer prescaler
    pub const CANTSPRE_MASK: u32 = 0xffff;
    /// Timestamp timer
    pub const CANTS_POS: u32 = 16;
}

/// `CxRXFn` and `CxRXMn` fields
///
/// Filters and masks share the layout; the extended identifier bit is called
/// `EXID` in the filter and `MIDE` in the mask.
pub mod rxf {
    /// Extended identifier bits
    pub const EID_MASK: u32 = 0x3_ffff;
    /// Extended identifier enable (`EXID` / `MIDE`)
    pub const EXID: u32 = 1 << 19;
    /// Standard identifier bits
    pub const SID_POS: u32 = 21;
    /// Standard identifier bits
    pub const SID_MASK: u32 = 0xffe0_0000;
}

/// `CxFLTCONn` fields
pub mod fltcon {
    /// Filter enable bit of filter `n`
    pub const fn flten(n: usize) -> u32 {
        1 << ((n % 4) * 8 + 7)
    }

    /// Mask select field of filter `n`
    pub const fn msel(n: usize, mask: u32) -> u32 {
        (mask & 0x3) << ((n % 4) * 8 + 5)
    }

    /// FIFO select field of filter `n`
    pub const fn fsel(n: usize, fifo: u32) -> u32 {
        (fifo & 0x1f) << ((n % 4) * 8)
    }
}

/// `CxFIFOCONn` fields
pub mod fifocon {
    /// Transmit priority
    pub const TXPRI_MASK: u32 = 0x3;
    /// Message send request
    pub const TXREQ: u32 = 1 << 3;
    /// FIFO is a transmit FIFO
    pub const TXEN: u32 = 1 << 7;
    /// Increment head/tail
    pub const UINC: u32 = 1 << 13;
    /// FIFO size minus one
    pub const FSIZE_POS: u32 = 16;
    /// FIFO size minus one
    pub const FSIZE_MASK: u32 = 0x1f_0000;
}

/// `CxFIFOCIn` fields
pub mod fifoci {
    /// Index of the message buffer the user address points to
    pub const CFIFOCI_MASK: u32 = 0x1f;
}
