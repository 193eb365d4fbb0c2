//! IPMI command handlers served by the BMC.
//!
//! Each handler is a unit struct implementing [`Command`](crate::dispatch::Command), so the
//! route it answers on sits next to the code that answers it.

pub mod app;
pub mod chassis;

use crate::dispatch::Dispatcher;

/// Register every App and Chassis handler.
pub fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher
        .register(app::GetDeviceId)
        .register(app::GetChannelAuthCapabilities)
        .register(app::GetSessionChallenge)
        .register(app::ActivateSession)
        .register(app::SetSessionPrivilegeLevel)
        .register(app::CloseSession)
        .register(chassis::GetChassisStatus)
        .register(chassis::ChassisControlCommand)
        .register(chassis::SetSystemBootOptions);
}
