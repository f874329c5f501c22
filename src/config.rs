//! Configuration passed to the protocol engine.

use crate::error::ConfigError;

/// How the socket factory maps local interfaces to sockets.
///
/// A single socket bound to the wildcard address does not receive multicast
/// traffic on every NIC on all platforms, hence the per-interface variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SocketStrategy {
    /// One socket per local IPv4 address serving both multicast and unicast.
    OneSocketPerInterface,
    /// One socket bound to `0.0.0.0` for everything.
    OneSingleSocket,
    /// One multicast socket bound to `0.0.0.0` joining the group on every
    /// interface, plus one unicast socket per interface. The default.
    #[default]
    MulticastSingleAndUnicastPerInterface,
    /// Unicast sockets only, one per interface. Discovery by subnet sweep
    /// still works without multicast.
    UnicastPerInterface,
}

/// Role to authenticate as against an inverter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u32)]
pub enum LoginRole {
    /// End user account.
    #[default]
    User = 0x07,
    /// Installer account.
    Installer = 0x0a,
}

impl LoginRole {
    /// Register code sent in the login request.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Byte added to each password character on the wire.
    pub const fn password_offset(self) -> u8 {
        match self {
            LoginRole::User => 0x88,
            LoginRole::Installer => 0xbb,
        }
    }
}

/// Tariff rates used for the derived monetary values.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TariffRates {
    /// Remuneration for energy fed into the grid, EUR per kWh.
    pub feed_in_eur_per_kwh: f64,
    /// Grid price avoided by self-consumption, EUR per kWh.
    pub self_consumption_eur_per_kwh: f64,
}

impl Default for TariffRates {
    fn default() -> Self {
        Self {
            feed_in_eur_per_kwh: 0.09,
            self_consumption_eur_per_kwh: 0.30,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Averaging window for emeter measurements in milliseconds. `0` passes
    /// every sample through unaveraged.
    pub averaging_time_obis_ms: u64,
    /// Averaging window for inverter measurements in milliseconds. Inverter
    /// timestamps count seconds, so this is divided by 1000 internally.
    pub averaging_time_speedwire_ms: u64,
    /// Socket factory strategy.
    pub socket_strategy: SocketStrategy,
    /// Login role.
    pub login_role: LoginRole,
    /// Device password, at most 12 characters.
    pub password: String,
    /// Maximum age in seconds a measurement may have to participate in a
    /// derived value.
    pub max_derived_age_secs: u32,
    /// Tariff rates for the derived monetary values.
    pub tariff: TariffRates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            averaging_time_obis_ms: 60_000,
            averaging_time_speedwire_ms: 60_000,
            socket_strategy: SocketStrategy::default(),
            login_role: LoginRole::default(),
            password: "0000".into(),
            max_derived_age_secs: 120,
            tariff: TariffRates::default(),
        }
    }
}

impl Config {
    /// Check constraints that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password.len() > 12 {
            return Err(ConfigError::PasswordTooLong {
                length: self.password.len(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.averaging_time_obis_ms, 60_000);
        assert_eq!(config.max_derived_age_secs, 120);
        assert_eq!(
            config.socket_strategy,
            SocketStrategy::MulticastSingleAndUnicastPerInterface
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn password_length_limit() {
        let config = Config {
            password: "far-too-long-password".into(),
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::PasswordTooLong { length: 21 })
        );
    }

    #[test]
    fn role_codes() {
        assert_eq!(LoginRole::User.code(), 0x07);
        assert_eq!(LoginRole::Installer.code(), 0x0a);
        assert_eq!(LoginRole::User.password_offset(), 0x88);
        assert_eq!(LoginRole::Installer.password_offset(), 0xbb);
    }
}
