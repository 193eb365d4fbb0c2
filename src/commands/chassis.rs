//! Chassis network function: power state and boot device, delegated to the target.

use std::sync::Arc;

use crate::dispatch::{Command, Handler, Outcome, Request, Response};
use crate::observe;
use crate::protocol::{cmd, completion, netfn};
use crate::server::BmcState;
use crate::target::PowerTarget;
use crate::types::{BootDevice, ChassisControl, ChassisStatus, PrivilegeLevel, power_state};

const BOOT_PARAM_BOOT_FLAGS: u8 = 0x05;
const BOOT_FLAGS_VALID: u8 = 0x80;
const BOOT_FLAGS_PERSISTENT: u8 = 0x40;

fn target_for(state: &BmcState, request: &Request<'_>) -> Option<Arc<dyn PowerTarget>> {
    let target = state.target_for(request.local);
    if target.is_none() {
        observe::no_target(request.local);
    }
    target
}

/// `Get Chassis Status` (Chassis NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetChassisStatus;

impl Command for GetChassisStatus {
    const NETFN: u8 = netfn::CHASSIS;
    const CMD: u8 = cmd::GET_CHASSIS_STATUS;
}

impl Handler for GetChassisStatus {
    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let Some(target) = target_for(state, request) else {
            return Outcome::Ignore;
        };
        let status = match target.is_running() {
            Ok(running) => ChassisStatus::from_running(running),
            Err(err) => {
                observe::target_failed("is_running", &err);
                ChassisStatus {
                    current_power_state: power_state::POWER_CONTROL_FAULT,
                    ..ChassisStatus::default()
                }
            }
        };
        Response::ok(status.to_bytes()).into()
    }
}

/// `Chassis Control` (Chassis NetFn, cmd 0x02).
#[derive(Debug, Clone, Copy, Default)]
pub struct ChassisControlCommand;

impl Command for ChassisControlCommand {
    const NETFN: u8 = netfn::CHASSIS;
    const CMD: u8 = cmd::CHASSIS_CONTROL;
}

impl Handler for ChassisControlCommand {
    fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::Operator
    }

    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let Some(&code) = request.data().first() else {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        };
        let Some(target) = target_for(state, request) else {
            return Outcome::Ignore;
        };

        let result = match ChassisControl::from_u8(code) {
            Some(ChassisControl::PowerDown) => target.power_off(),
            Some(ChassisControl::PowerUp) => target.power_on(),
            // No reset primitive on targets: hard reset is a power cycle.
            Some(ChassisControl::PowerCycle | ChassisControl::HardReset) => {
                target.power_off().and_then(|()| target.power_on())
            }
            Some(ChassisControl::PulseDiagnostic) => Ok(()),
            Some(ChassisControl::AcpiSoft) => target.power_soft(),
            None => {
                observe::unknown_chassis_control(code);
                Ok(())
            }
        };

        match result {
            Ok(()) => Response::code(completion::OK).into(),
            Err(err) => {
                observe::target_failed("chassis control", &err);
                Response::code(completion::UNSPECIFIED).into()
            }
        }
    }
}

/// `Set System Boot Options` (Chassis NetFn, cmd 0x08).
///
/// Only the boot flags parameter acts on the target; every other parameter is acknowledged
/// and discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetSystemBootOptions;

impl Command for SetSystemBootOptions {
    const NETFN: u8 = netfn::CHASSIS;
    const CMD: u8 = cmd::SET_SYSTEM_BOOT_OPTIONS;
}

impl Handler for SetSystemBootOptions {
    fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::Operator
    }

    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let data = request.data();
        let Some(&selector) = data.first() else {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        };

        // Bit 7 of the selector only marks the parameter valid/invalid; the number is 6:0.
        if selector & 0x7F != BOOT_PARAM_BOOT_FLAGS {
            return Response::code(completion::OK).into();
        }
        let &[_, flags, device, ..] = data else {
            return Response::code(completion::OK).into();
        };
        if flags & BOOT_FLAGS_VALID == 0 {
            return Response::code(completion::OK).into();
        }

        let Some(target) = target_for(state, request) else {
            return Outcome::Ignore;
        };
        let device = BootDevice::from_selector((device >> 2) & 0x0F);
        match target.set_boot_device(device, flags & BOOT_FLAGS_PERSISTENT != 0) {
            Ok(()) => Response::code(completion::OK).into(),
            Err(err) => {
                observe::target_failed("set boot device", &err);
                Response::code(completion::UNSPECIFIED).into()
            }
        }
    }
}
