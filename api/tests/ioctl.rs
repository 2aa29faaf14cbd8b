mod common;

use axerrno::AxError;
use common::{Fixture, Options};
use memory_addr::{PhysAddr, PhysAddrRange, VirtAddr};
use mxcvpu_api::vfs::dev::iram::IMX6_IRAM_BASE;
use mxcvpu_api::vfs::dev::vpu::{IramSetting, SocKind, VpuError, VpuIoctl, VpuMemDesc};
use mxcvpu_api::vfs::{DeviceMmap, DeviceOps, MmapFlags};
use zerocopy::{FromBytes, IntoBytes};

fn desc(size: u64) -> VpuMemDesc {
    VpuMemDesc {
        size,
        ..Default::default()
    }
}

#[test]
fn unknown_command_is_rejected() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut arg = [0u8; 32];
    assert_eq!(f.dispatch(0x5605, &mut arg), Err(VpuError::InvalidHandle(0x5605)));
    assert_eq!(f.ioctl(0x1234, &mut arg), Err(AxError::InvalidInput));
}

#[test]
fn short_payload_mutates_nothing() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut short = [0u8; 16];
    short[..8].copy_from_slice(&4096u64.to_le_bytes());
    assert_eq!(
        f.dispatch(VpuIoctl::PhymemAlloc as u32, &mut short),
        Err(VpuError::Marshaling)
    );
    assert!(fx.dev.registry().is_empty());
    assert_eq!(
        f.dispatch(VpuIoctl::Wait4Int as u32, &mut [0u8; 2]),
        Err(VpuError::Marshaling)
    );
    assert_eq!(
        f.ioctl(VpuIoctl::LockDev as u32, &mut []),
        Err(AxError::BadAddress)
    );
}

#[test]
fn alloc_reports_rounded_size() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut d = desc(5000);
    f.ioctl(VpuIoctl::PhymemAlloc as u32, d.as_mut_bytes()).unwrap();
    assert_eq!(d.size, 8192);
    let entry = fx
        .dev
        .registry()
        .lookup(VirtAddr::from_usize(d.cpu_addr as usize))
        .unwrap();
    assert_eq!(entry.phys_addr.as_usize() as u64, d.phy_addr);
}

#[test]
fn iram_region_reported() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut arg = [0u8; 8];
    f.dispatch(VpuIoctl::IramSetting as u32, &mut arg).unwrap();
    let iram = IramSetting::read_from_bytes(&arg).unwrap();
    assert_eq!(iram.start as usize, IMX6_IRAM_BASE);
    assert_eq!(iram.end as usize, IMX6_IRAM_BASE + 0x21000 - 1);

    // no pool on i.MX53
    let fx = Fixture::with_soc(SocKind::Imx53);
    let f = fx.open();
    f.dispatch(VpuIoctl::IramSetting as u32, &mut arg).unwrap();
    assert_eq!(IramSetting::read_from_bytes(&arg).unwrap(), IramSetting::default());
}

#[test]
fn phys_check_uses_dram_top() {
    let fx = Fixture::build(Options {
        dram_top: Some(0x8000_0000),
        ..Default::default()
    });
    let f = fx.open();
    let mut d = VpuMemDesc {
        phy_addr: 0x1000_0000,
        ..Default::default()
    };
    f.dispatch(VpuIoctl::PhymemCheck as u32, d.as_mut_bytes()).unwrap();
    assert_eq!(d.size, 1);
    d.phy_addr = 0x9000_0000;
    f.dispatch(VpuIoctl::PhymemCheck as u32, d.as_mut_bytes()).unwrap();
    assert_eq!(d.size, 0);
}

#[test]
fn work_buffer_must_come_from_registry() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut bogus = VpuMemDesc {
        size: 4096,
        phy_addr: 0x2000_0000,
        cpu_addr: 0xdead_0000,
        virt_uaddr: 0,
    };
    assert_eq!(
        f.dispatch(VpuIoctl::SetBitworkMem as u32, bogus.as_mut_bytes()),
        Err(VpuError::InvalidArgument)
    );

    let mut buf = desc(0x8000);
    f.dispatch(VpuIoctl::PhymemAlloc as u32, buf.as_mut_bytes()).unwrap();
    f.dispatch(VpuIoctl::SetBitworkMem as u32, buf.as_mut_bytes()).unwrap();
    let mut query = VpuMemDesc::default();
    f.dispatch(VpuIoctl::QueryBitworkMem as u32, query.as_mut_bytes()).unwrap();
    assert_eq!(query, buf);

    // GET_WORK_ADDR hands back the adopted buffer instead of allocating
    let mut get = desc(0x1000);
    f.dispatch(VpuIoctl::GetWorkAddr as u32, get.as_mut_bytes()).unwrap();
    assert_eq!(get, buf);
    assert_eq!(fx.dma.live_coherent(), 1);

    // freeing it detaches it
    f.dispatch(VpuIoctl::PhymemFree as u32, buf.as_mut_bytes()).unwrap();
    f.dispatch(VpuIoctl::QueryBitworkMem as u32, query.as_mut_bytes()).unwrap();
    assert_eq!(query, VpuMemDesc::default());
}

#[test]
fn adopting_a_buffer_frees_the_driver_one() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut own = desc(0x1000);
    f.dispatch(VpuIoctl::GetWorkAddr as u32, own.as_mut_bytes()).unwrap();
    let mut user = desc(0x1000);
    f.dispatch(VpuIoctl::PhymemAlloc as u32, user.as_mut_bytes()).unwrap();
    assert_eq!(fx.dma.live_coherent(), 2);

    f.dispatch(VpuIoctl::SetBitworkMem as u32, user.as_mut_bytes()).unwrap();
    assert_eq!(fx.dma.live_coherent(), 1);

    let mut none = VpuMemDesc::default();
    f.dispatch(VpuIoctl::SetBitworkMem as u32, none.as_mut_bytes()).unwrap();
    assert_eq!(fx.dev.query_work_mem(), VpuMemDesc::default());
    assert_eq!(fx.dev.registry().len(), 1);
}

#[test]
fn mmap_windows() {
    let fx = Fixture::new();
    let f = fx.open();
    let cfg = fx.dev.config().clone();

    match f.mmap(0, 0x4000) {
        DeviceMmap::Physical(range, flags) => {
            assert_eq!(
                range,
                PhysAddrRange::from_start_size(PhysAddr::from_usize(cfg.regs_phys), 0x4000)
            );
            assert!(flags.contains(MmapFlags::UNCACHED | MmapFlags::NO_EXEC));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(f.mmap(0, 0x8000), DeviceMmap::None);

    let mut v = desc(0x2000);
    f.dispatch(VpuIoctl::ReqVshareMem as u32, v.as_mut_bytes()).unwrap();
    assert_eq!(v.phy_addr, 0);
    assert_eq!(
        f.mmap(v.cpu_addr as usize / 4096, 0x2000),
        DeviceMmap::Vmalloc {
            start: VirtAddr::from_usize(v.cpu_addr as usize),
            size: 0x2000,
        }
    );

    let mut d = desc(0x3000);
    f.dispatch(VpuIoctl::PhymemAlloc as u32, d.as_mut_bytes()).unwrap();
    let pgoff = d.phy_addr as usize / 4096;
    assert_eq!(
        f.mmap(pgoff, 0x3000),
        DeviceMmap::Physical(
            PhysAddrRange::from_start_size(PhysAddr::from_usize(d.phy_addr as usize), 0x3000),
            MmapFlags::IO | MmapFlags::WRITE_COMBINE,
        )
    );
    assert_eq!(f.mmap(pgoff, 0x4000), DeviceMmap::None);
    assert_eq!(f.mmap(pgoff + 0x100, 0x1000), DeviceMmap::None);

    let mut s = desc(0x1000);
    f.dispatch(VpuIoctl::GetShareMem as u32, s.as_mut_bytes()).unwrap();
    assert!(matches!(
        f.mmap(s.phy_addr as usize / 4096, 0x1000),
        DeviceMmap::Physical(..)
    ));
}

#[test]
fn dumps_and_reset_are_accepted() {
    let fx = Fixture::new();
    let f = fx.open();
    let mut none = [0u8; 0];
    f.dispatch(VpuIoctl::RegDump as u32, &mut none).unwrap();
    f.dispatch(VpuIoctl::PhymemDump as u32, &mut none).unwrap();
    f.dispatch(VpuIoctl::SysSwReset as u32, &mut none).unwrap();
    assert_eq!(fx.resets(), 1);
}

#[test]
fn vshare_failure_is_no_memory() {
    let fx = Fixture::new();
    let f = fx.open();
    fx.dma.set_fail(true);
    let mut v = desc(0x1000);
    assert_eq!(
        f.ioctl(VpuIoctl::ReqVshareMem as u32, v.as_mut_bytes()),
        Err(AxError::NoMemory)
    );
    let mut zero = desc(0);
    fx.dma.set_fail(false);
    assert_eq!(
        f.dispatch(VpuIoctl::ReqVshareMem as u32, zero.as_mut_bytes()),
        Err(VpuError::ResourceExhausted)
    );
}
