//! Power-controllable targets behind each emulated BMC address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::observe;
use crate::types::BootDevice;

/// Something whose power state chassis commands observe and drive.
///
/// Calls may block; the transports run them off the async reactor.
pub trait PowerTarget: Send + Sync {
    /// Whether the target is currently running.
    fn is_running(&self) -> Result<bool>;

    /// Power the target on.
    fn power_on(&self) -> Result<()>;

    /// Hard power off.
    fn power_off(&self) -> Result<()>;

    /// Graceful (ACPI) shutdown request.
    fn power_soft(&self) -> Result<()>;

    /// Select the device for the next boot.
    fn set_boot_device(&self, device: BootDevice, persistent: bool) -> Result<()> {
        let _ = (device, persistent);
        Ok(())
    }
}

/// One power operation applied to a [`SimulatedMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// `power_on`.
    On,
    /// `power_off`.
    Off,
    /// `power_soft`.
    Soft,
}

/// In-memory target for tests and dry runs.
#[derive(Debug, Default)]
pub struct SimulatedMachine {
    running: AtomicBool,
    failing: bool,
    history: Mutex<Vec<PowerEvent>>,
    boot_device: Mutex<Option<(BootDevice, bool)>>,
}

impl SimulatedMachine {
    /// A machine that starts in the given state.
    pub fn new(running: bool) -> Self {
        Self {
            running: AtomicBool::new(running),
            ..Self::default()
        }
    }

    /// A machine whose every operation fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Power operations applied so far, oldest first.
    pub fn history(&self) -> Vec<PowerEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last boot device selected, with its persistence flag.
    pub fn boot_device(&self) -> Option<(BootDevice, bool)> {
        *self
            .boot_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: PowerEvent, running: bool) -> Result<()> {
        if self.failing {
            return Err(Error::target("simulated failure"));
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.running.store(running, Ordering::SeqCst);
        Ok(())
    }
}

impl PowerTarget for SimulatedMachine {
    fn is_running(&self) -> Result<bool> {
        if self.failing {
            return Err(Error::target("simulated failure"));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn power_on(&self) -> Result<()> {
        self.apply(PowerEvent::On, true)
    }

    fn power_off(&self) -> Result<()> {
        self.apply(PowerEvent::Off, false)
    }

    fn power_soft(&self) -> Result<()> {
        self.apply(PowerEvent::Soft, false)
    }

    fn set_boot_device(&self, device: BootDevice, persistent: bool) -> Result<()> {
        if self.failing {
            return Err(Error::target("simulated failure"));
        }
        *self
            .boot_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((device, persistent));
        Ok(())
    }
}

/// A VirtualBox VM driven through `VBoxManage`.
#[derive(Debug, Clone)]
pub struct VirtualBoxMachine {
    vm: String,
    vboxmanage: PathBuf,
}

impl VirtualBoxMachine {
    /// Default `VBoxManage` executable, resolved through `PATH`.
    pub const DEFAULT_VBOXMANAGE: &'static str = "VBoxManage";

    /// Control the VM with the given name or UUID.
    pub fn new(vm: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            vboxmanage: PathBuf::from(Self::DEFAULT_VBOXMANAGE),
        }
    }

    /// Use a specific `VBoxManage` executable.
    pub fn with_vboxmanage(mut self, path: impl Into<PathBuf>) -> Self {
        self.vboxmanage = path.into();
        self
    }

    /// VM name or UUID.
    pub fn vm(&self) -> &str {
        &self.vm
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.vboxmanage).args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::target(format!(
                "VBoxManage {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extract the running state from `showvminfo --machinereadable` output.
fn parse_vm_state(info: &str) -> Result<bool> {
    info.lines()
        .find_map(|line| line.strip_prefix("VMState="))
        .map(|state| state.trim().trim_matches('"') == "running")
        .ok_or(Error::Target("VMState missing from showvminfo output".into()))
}

fn vbox_boot_device(device: BootDevice) -> Option<&'static str> {
    match device {
        BootDevice::Pxe => Some("net"),
        BootDevice::Disk | BootDevice::DiskSafeMode => Some("disk"),
        BootDevice::Cdrom => Some("dvd"),
        BootDevice::Floppy => Some("floppy"),
        _ => None,
    }
}

impl PowerTarget for VirtualBoxMachine {
    fn is_running(&self) -> Result<bool> {
        let info = self.run(&["showvminfo", &self.vm, "--machinereadable"])?;
        parse_vm_state(&info)
    }

    fn power_on(&self) -> Result<()> {
        if self.is_running()? {
            return Ok(());
        }
        self.run(&["startvm", &self.vm, "--type", "headless"])?;
        Ok(())
    }

    // `controlvm` fails on a stopped VM, so off and soft are no-ops there.
    fn power_off(&self) -> Result<()> {
        if !self.is_running()? {
            return Ok(());
        }
        self.run(&["controlvm", &self.vm, "poweroff"])?;
        Ok(())
    }

    fn power_soft(&self) -> Result<()> {
        if !self.is_running()? {
            return Ok(());
        }
        self.run(&["controlvm", &self.vm, "acpipowerbutton"])?;
        Ok(())
    }

    fn set_boot_device(&self, device: BootDevice, persistent: bool) -> Result<()> {
        let Some(name) = vbox_boot_device(device) else {
            observe::boot_device_ignored(&self.vm, device);
            return Ok(());
        };
        // VirtualBox has no one-shot boot override; every selection persists.
        let _ = persistent;
        self.run(&["modifyvm", &self.vm, "--boot1", name])?;
        Ok(())
    }
}

/// Which target answers for which local address.
#[derive(Clone, Default)]
pub struct TargetMap {
    targets: HashMap<IpAddr, Arc<dyn PowerTarget>>,
}

impl core::fmt::Debug for TargetMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.targets.keys()).finish()
    }
}

impl TargetMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `target` to `addr`, replacing any previous binding.
    pub fn insert(&mut self, addr: IpAddr, target: Arc<dyn PowerTarget>) {
        self.targets.insert(addr, target);
    }

    /// Target bound to `addr`.
    pub fn get(&self, addr: IpAddr) -> Option<Arc<dyn PowerTarget>> {
        self.targets.get(&addr).cloned()
    }

    /// All bound addresses.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.targets.keys().copied()
    }

    /// Number of bound addresses.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no address is bound.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
