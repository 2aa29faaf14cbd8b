#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use memory_addr::VirtAddr;
use mxcvpu_api::vfs::dev::iram::IramPool;
use mxcvpu_api::vfs::dev::vpu::regs::*;
use mxcvpu_api::vfs::dev::vpu::{
    PowerSupply, PuPowerDomain, SocKind, SrcReset, VpuConfig, VpuDevice, VpuFile, VpuResources,
};
use mxcvpu_core::hal::ClockGate;
use mxcvpu_core::mock::{
    MockClock, MockDmaAllocator, MockPowerGate, MockRegs, MockRegulator, MockTimer,
};

pub const SPIN_LIMIT: usize = 1000;

/// Knobs for [`Fixture::build`].
pub struct Options {
    pub soc: SocKind,
    /// GDI bus answers a drain request.
    pub gdi_acks: bool,
    pub dram_top: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            soc: SocKind::Imx6Q,
            gdi_acks: true,
            dram_top: None,
        }
    }
}

/// A probed VPU on mock hardware.
pub struct Fixture {
    pub dev: Arc<VpuDevice>,
    pub regs: Arc<MockRegs>,
    pub gpc: Arc<MockRegs>,
    pub src: Arc<MockRegs>,
    pub clk: Arc<MockClock>,
    pub dma: Arc<MockDmaAllocator>,
    pub timer: Arc<MockTimer>,
    pub gate: Arc<MockPowerGate>,
    pub regulator: Arc<MockRegulator>,
    pub pool: Arc<IramPool>,
    pub pu: Option<Arc<PuPowerDomain>>,
    /// `GPC_CNTR` request bits the GPC completes; clear one to make it hang.
    pub gpc_acks: Arc<AtomicU32>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(Options::default())
    }

    pub fn with_soc(soc: SocKind) -> Self {
        Self::build(Options {
            soc,
            ..Default::default()
        })
    }

    pub fn build(opts: Options) -> Self {
        let gdi_acks = opts.gdi_acks;
        // CODE_RUN restarts the BIT processor, which then drops its busy flag.
        let regs = Arc::new(MockRegs::with_hook(move |regs, off, val| {
            if off == BIT_CODE_RUN && val == 1 {
                regs.insert(BIT_BUSY_FLAG, 0);
            }
            if off == GDI_BUS_CTRL && val == GDI_BUS_DRAIN_REQ && gdi_acks {
                regs.insert(GDI_BUS_STATUS, GDI_BUS_DRAINED);
            }
        }));
        let gpc_acks = Arc::new(AtomicU32::new(GpcCntr::all().bits()));
        let gpc = Arc::new(MockRegs::with_hook({
            let gpc_acks = gpc_acks.clone();
            move |regs, off, val| {
                if off == GPC_CNTR {
                    regs.insert(GPC_CNTR, val & !gpc_acks.load(Ordering::SeqCst));
                }
            }
        }));
        let src = Arc::new(MockRegs::with_hook(|regs, off, val| {
            if off == SRC_SCR {
                regs.insert(SRC_SCR, val & !SRC_SCR_VPU_RST);
            }
        }));
        let anatop = Arc::new(MockRegs::new());
        anatop.poke(ANA_REG_CORE, 0x10 << REG_CORE_REG2_OFFSET);

        let clk = Arc::new(MockClock::new());
        let dma = Arc::new(MockDmaAllocator::new());
        let timer = Arc::new(MockTimer::new());
        let gate = Arc::new(MockPowerGate::new());
        let regulator = Arc::new(MockRegulator::new());
        let pool = Arc::new(IramPool::imx6().with_virt_base(VirtAddr::from_usize(0xf090_0000)));

        let mut config = VpuConfig::for_soc(opts.soc);
        config.power_ack_spin_limit = SPIN_LIMIT;
        config.dram_top = opts.dram_top;

        let (power, pu, reset) = if opts.soc.is_imx6() {
            let island_clk: Arc<dyn ClockGate> = Arc::new(MockClock::new());
            let pu = Arc::new(PuPowerDomain::new(
                gpc.clone(),
                anatop,
                vec![island_clk],
                timer.clone(),
                SPIN_LIMIT,
            ));
            let reset = Arc::new(SrcReset::new(src.clone(), SPIN_LIMIT));
            (PowerSupply::Island(pu.clone()), Some(pu), Some(reset))
        } else {
            (PowerSupply::Regulator(regulator.clone()), None, None)
        };

        let res = VpuResources {
            regs: regs.clone(),
            vpu_clk: clk.clone(),
            power,
            reset,
            idle_gate: Some(gate.clone()),
            dma: dma.clone(),
            timer: timer.clone(),
            iram: Some(pool.clone()),
        };
        let dev = VpuDevice::probe(config, res).unwrap();

        Self {
            dev,
            regs,
            gpc,
            src,
            clk,
            dma,
            timer,
            gate,
            regulator,
            pool,
            pu,
            gpc_acks,
        }
    }

    pub fn open(&self) -> VpuFile {
        self.dev.open().unwrap()
    }

    pub fn pu_count(&self) -> usize {
        self.pu.as_ref().map_or(0, |pu| pu.count())
    }

    /// Number of PU power-down requests issued so far.
    pub fn power_downs(&self) -> usize {
        self.gpc
            .writes_to(GPC_CNTR)
            .iter()
            .filter(|v| *v & 0x1 != 0)
            .count()
    }

    pub fn power_ups(&self) -> usize {
        self.gpc
            .writes_to(GPC_CNTR)
            .iter()
            .filter(|v| *v & 0x2 != 0)
            .count()
    }

    /// Number of VPU domain resets issued so far.
    pub fn resets(&self) -> usize {
        self.src
            .writes_to(SRC_SCR)
            .iter()
            .filter(|v| *v & SRC_SCR_VPU_RST != 0)
            .count()
    }
}
