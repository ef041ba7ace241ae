// Handles all interactions with the systemd service manager over D-Bus.

use super::model::UnitState;
use thiserror::Error;
use tracing::trace;
use zbus::blocking::Connection;
use zbus::proxy::CacheProperties;
use zbus::zvariant::OwnedObjectPath;

const NO_SUCH_UNIT: &str = "org.freedesktop.systemd1.NoSuchUnit";

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait Manager {
    fn get_unit(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Unit",
    default_service = "org.freedesktop.systemd1"
)]
trait Unit {
    #[zbus(property)]
    fn active_state(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn sub_state(&self) -> zbus::Result<String>;
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("service manager unreachable: {0}")]
    Transport(#[from] zbus::Error),

    #[error("unit {0:?} is not known to the service manager")]
    UnitNotFound(String),
}

/// Reads the lifecycle of a named unit.
///
/// Implementations are called once at startup and then once per poll tick,
/// always from the thread that owns the monitor session.
pub trait StateQuery {
    fn query(&mut self, unit: &str) -> Result<UnitState, QueryError>;
}

/// `StateQuery` backed by systemd's D-Bus API.
pub struct SystemdQuery {
    connection: Connection,
    manager: ManagerProxyBlocking<'static>,
}

impl SystemdQuery {
    /// Connects to the system bus, where `snapd.seeded.service` lives.
    pub fn system() -> Result<Self, QueryError> {
        Self::with_connection(Connection::system()?)
    }

    /// Connects to the session bus, for watching `systemctl --user` units.
    pub fn session() -> Result<Self, QueryError> {
        Self::with_connection(Connection::session()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, QueryError> {
        let manager = ManagerProxyBlocking::new(&connection)?;
        Ok(Self {
            connection,
            manager,
        })
    }

    fn resolve(&self, unit: &str) -> Result<OwnedObjectPath, QueryError> {
        self.manager.get_unit(unit).map_err(|err| classify(unit, err))
    }
}

/// Rejects names the manager can never resolve, before any bus traffic.
fn check_unit_name(unit: &str) -> Result<(), QueryError> {
    if unit.is_empty() {
        return Err(QueryError::UnitNotFound(String::new()));
    }
    Ok(())
}

/// Maps a failed `GetUnit` call: systemd's NoSuchUnit reply means the unit
/// is unknown, anything else is a transport problem.
fn classify(unit: &str, err: zbus::Error) -> QueryError {
    match err {
        zbus::Error::MethodError(name, _, _) if name.as_str() == NO_SUCH_UNIT => {
            QueryError::UnitNotFound(unit.to_string())
        }
        err => QueryError::Transport(err),
    }
}

impl StateQuery for SystemdQuery {
    fn query(&mut self, unit: &str) -> Result<UnitState, QueryError> {
        check_unit_name(unit)?;

        let path = self.resolve(unit)?;
        trace!(unit, path = %path.as_str(), "resolved unit");

        // Uncached, so every property read is a round-trip.
        let proxy = UnitProxyBlocking::builder(&self.connection)
            .path(path)?
            .cache_properties(CacheProperties::No)
            .build()?;

        Ok(UnitState::new(proxy.active_state()?, proxy.sub_state()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::message::Message;
    use zbus::names::ErrorName;

    fn method_error(name: &str) -> zbus::Error {
        let reply = Message::method_call("/org/freedesktop/systemd1", "GetUnit")
            .unwrap()
            .build(&())
            .unwrap();
        let name = ErrorName::try_from(name).unwrap();
        zbus::Error::MethodError(name.into(), Some("unit not loaded".into()), reply)
    }

    #[test]
    fn no_such_unit_reply_means_unit_not_found() {
        let err = classify(
            "snapd.seeded.service",
            method_error("org.freedesktop.systemd1.NoSuchUnit"),
        );

        assert!(matches!(err, QueryError::UnitNotFound(unit) if unit == "snapd.seeded.service"));
    }

    #[test]
    fn other_method_errors_are_transport_errors() {
        let err = classify(
            "snapd.seeded.service",
            method_error("org.freedesktop.DBus.Error.AccessDenied"),
        );

        assert!(matches!(err, QueryError::Transport(zbus::Error::MethodError(..))));
    }

    #[test]
    fn bus_failures_are_transport_errors() {
        let err = classify(
            "snapd.seeded.service",
            zbus::Error::Failure("connection reset".into()),
        );

        assert!(matches!(err, QueryError::Transport(zbus::Error::Failure(_))));
    }

    #[test]
    fn empty_unit_name_is_rejected_up_front() {
        assert!(matches!(
            check_unit_name(""),
            Err(QueryError::UnitNotFound(unit)) if unit.is_empty()
        ));
        assert!(check_unit_name("snapd.seeded.service").is_ok());
    }
}
