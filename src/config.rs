//! TOML configuration for the emulator binary.
//!
//! ```toml
//! port = 623
//! auth_types = ["none", "md5", "password"]
//!
//! [[user]]
//! name = "admin"
//! password = "pass"
//! privilege = "administrator"
//!
//! [[bmc]]
//! address = "192.168.56.10"
//! target = { kind = "virtualbox", vm = "lab-node-01" }
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::server::{BmcBuilder, DEFAULT_PORT};
use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS, User};
use crate::target::{PowerTarget, SimulatedMachine, VirtualBoxMachine};
use crate::types::{AuthType, DeviceIdentity, PrivilegeLevel};

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port bound on every BMC address.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Drop requests whose authentication code does not verify.
    #[serde(default)]
    pub strict_authentication: bool,
    /// Session registry capacity.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds a session may stay idle before it is discarded.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Authentication types offered to consoles.
    #[serde(default = "default_auth_types")]
    pub auth_types: Vec<AuthType>,
    /// Identity reported by Get Device ID.
    #[serde(default)]
    pub device: DeviceIdentity,
    /// User accounts (`[[user]]` tables).
    #[serde(default, rename = "user")]
    pub users: Vec<UserConfig>,
    /// Emulated BMCs (`[[bmc]]` tables).
    #[serde(default, rename = "bmc")]
    pub bmcs: Vec<BmcConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_session_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_auth_types() -> Vec<AuthType> {
    vec![AuthType::None, AuthType::Md5, AuthType::Password]
}

fn default_privilege() -> PrivilegeLevel {
    PrivilegeLevel::Administrator
}

/// One user account.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// User name; empty for the null user.
    pub name: String,
    /// Password, at most 16 bytes.
    #[serde(default)]
    pub password: String,
    /// Highest privilege the user may activate.
    #[serde(default = "default_privilege")]
    pub privilege: PrivilegeLevel,
}

impl core::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserConfig")
            .field("name", &self.name)
            .field("password", &"<secret>")
            .field("privilege", &self.privilege)
            .finish()
    }
}

/// One emulated BMC: a local address and the target behind it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BmcConfig {
    /// Local address the BMC answers on.
    pub address: IpAddr,
    /// The machine it controls.
    pub target: TargetConfig,
}

/// Target kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetConfig {
    /// In-memory machine.
    Simulated {
        /// Initial power state.
        #[serde(default)]
        running: bool,
    },
    /// VirtualBox VM controlled through `VBoxManage`.
    Virtualbox {
        /// VM name or UUID.
        vm: String,
        /// `VBoxManage` executable; looked up in `PATH` when absent.
        #[serde(default)]
        vboxmanage: Option<PathBuf>,
    },
}

impl TargetConfig {
    fn instantiate(&self) -> Arc<dyn PowerTarget> {
        match self {
            Self::Simulated { running } => Arc::new(SimulatedMachine::new(*running)),
            Self::Virtualbox { vm, vboxmanage } => {
                let machine = VirtualBoxMachine::new(vm.clone());
                match vboxmanage {
                    Some(path) => Arc::new(machine.with_vboxmanage(path.clone())),
                    None => Arc::new(machine),
                }
            }
        }
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bmcs.is_empty() {
            return Err(Error::Config("no [[bmc]] entries".into()));
        }
        let mut addresses = HashSet::new();
        for bmc in &self.bmcs {
            if !addresses.insert(bmc.address) {
                return Err(Error::Config(format!(
                    "duplicate [[bmc]] address {}",
                    bmc.address
                )));
            }
        }
        let mut names = HashSet::new();
        for user in &self.users {
            if !names.insert(user.name.as_str()) {
                return Err(Error::Config(format!("duplicate user {:?}", user.name)));
            }
        }
        Ok(())
    }

    /// Turn the configuration into a [`BmcBuilder`].
    pub fn to_builder(&self) -> Result<BmcBuilder> {
        let mut builder = BmcBuilder::new()
            .port(self.port)
            .strict_authentication(self.strict_authentication)
            .max_sessions(self.max_sessions)
            .session_timeout(Duration::from_secs(self.session_timeout_secs))
            .auth_types(self.auth_types.iter().copied())
            .device(self.device.clone());

        for user in &self.users {
            let account = User::new(
                user.name.as_bytes(),
                SecretBytes::from(user.password.as_str()),
                user.privilege,
            )
            .map_err(|e| Error::Config(format!("user {:?}: {e}", user.name)))?;
            builder = builder.user(account);
        }
        for bmc in &self.bmcs {
            builder = builder.target(bmc.address, bmc.target.instantiate());
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        port = 6230
        strict_authentication = true
        auth_types = ["md5"]

        [device]
        manufacturer_id = 4753
        product_id = 7

        [[user]]
        name = "admin"
        password = "pass"

        [[user]]
        name = "viewer"
        password = "look"
        privilege = "user"

        [[bmc]]
        address = "127.0.0.1"
        target = { kind = "simulated", running = true }

        [[bmc]]
        address = "192.168.56.10"
        [bmc.target]
        kind = "virtualbox"
        vm = "lab-node-01"
        vboxmanage = "/usr/bin/VBoxManage"
    "#;

    #[test]
    fn parses_full_sample() {
        let config = Config::from_toml_str(SAMPLE).expect("config");
        assert_eq!(config.port, 6230);
        assert!(config.strict_authentication);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.session_timeout_secs, 60);
        assert_eq!(config.auth_types, vec![AuthType::Md5]);
        assert_eq!(config.device.manufacturer_id, 4753);
        assert_eq!(config.device.device_id, DeviceIdentity::default().device_id);
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].privilege, PrivilegeLevel::Administrator);
        assert_eq!(config.users[1].privilege, PrivilegeLevel::User);
        assert!(matches!(
            config.bmcs[0].target,
            TargetConfig::Simulated { running: true }
        ));
        assert!(matches!(
            &config.bmcs[1].target,
            TargetConfig::Virtualbox { vm, vboxmanage: Some(_) } if vm == "lab-node-01"
        ));

        let bmc = crate::server::Bmc::from_config(&config).expect("bmc");
        assert_eq!(bmc.endpoints().len(), 2);
        assert!(bmc.state().strict_authentication());
        assert!(!bmc.state().auth_type_enabled(AuthType::None));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_toml_str(
            r#"
            [[bmc]]
            address = "127.0.0.1"
            target = { kind = "simulated" }
            "#,
        )
        .expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.strict_authentication);
        assert_eq!(config.auth_types, default_auth_types());
        assert!(config.users.is_empty());
    }

    #[test]
    fn rejects_inconsistent_files() {
        let no_bmc = "port = 623\n";
        assert!(matches!(
            Config::from_toml_str(no_bmc),
            Err(Error::Config(_))
        ));

        let duplicate = r#"
            [[bmc]]
            address = "127.0.0.1"
            target = { kind = "simulated" }
            [[bmc]]
            address = "127.0.0.1"
            target = { kind = "simulated" }
        "#;
        assert!(matches!(
            Config::from_toml_str(duplicate),
            Err(Error::Config(_))
        ));

        let unknown_kind = r#"
            [[bmc]]
            address = "127.0.0.1"
            target = { kind = "qemu" }
        "#;
        assert!(matches!(
            Config::from_toml_str(unknown_kind),
            Err(Error::ConfigParse(_))
        ));

        let typo = "prot = 623\n";
        assert!(matches!(
            Config::from_toml_str(typo),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn session_timeout_reaches_registry() {
        let text = |secs: u64| {
            format!(
                "session_timeout_secs = {secs}\n[[bmc]]\naddress = \"127.0.0.1\"\ntarget = {{ kind = \"simulated\" }}\n"
            )
        };
        let config = Config::from_toml_str(&text(5)).expect("config");
        let bmc = crate::server::Bmc::from_config(&config).expect("bmc");
        assert_eq!(bmc.sessions().idle_timeout(), Duration::from_secs(5));

        let zero = Config::from_toml_str(&text(0)).expect("config");
        assert!(matches!(
            crate::server::Bmc::from_config(&zero),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn long_passwords_fail_at_build() {
        let config = Config::from_toml_str(
            r#"
            [[user]]
            name = "admin"
            password = "this-password-is-too-long"

            [[bmc]]
            address = "127.0.0.1"
            target = { kind = "simulated" }
            "#,
        )
        .expect("config");
        assert!(matches!(config.to_builder(), Err(Error::Config(_))));
    }

    #[test]
    fn password_is_not_debug_printed() {
        let config = Config::from_toml_str(SAMPLE).expect("config");
        let printed = format!("{config:?}");
        assert!(!printed.contains("pass\""));
        assert!(printed.contains("<secret>"));
    }
}
