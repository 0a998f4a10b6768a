use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentwise_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentwise_query_duration_seconds";

/// Counter: rental state changes applied. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "rentwise_rental_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentwise_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentwise_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentwise_connections_rejected_total";

/// Counter: statements whose session user is not a registered user.
pub const AUTH_FAILURES_TOTAL: &str = "rentwise_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertProperty { .. } => "insert_property",
        Command::InsertRental { .. } => "insert_rental",
        Command::UpdateRental { state, .. } => match state {
            crate::model::RentalState::Confirmed => "confirm_rental",
            crate::model::RentalState::Denied => "deny_rental",
            crate::model::RentalState::Cancelled => "cancel_rental",
            crate::model::RentalState::Expired => "expire_rental",
            _ => "update_rental",
        },
        Command::DeleteRental { .. } => "delete_rental",
        Command::SelectRentals { .. } => "select_rentals",
        Command::SelectProperties { filter } => match filter {
            crate::sql::PropertyFilter::All => "select_properties",
            _ => "search_properties",
        },
        Command::SelectUsers => "select_users",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RentalState;
    use ulid::Ulid;

    #[test]
    fn update_label_follows_target_state() {
        let cmd = |state| Command::UpdateRental {
            id: Ulid::new(),
            state,
            cancel_date: None,
        };
        assert_eq!(command_label(&cmd(RentalState::Confirmed)), "confirm_rental");
        assert_eq!(command_label(&cmd(RentalState::Cancelled)), "cancel_rental");
        assert_eq!(command_label(&cmd(RentalState::Pending)), "update_rental");
    }

    #[test]
    fn filtered_property_select_is_a_search() {
        use crate::sql::PropertyFilter;
        let all = Command::SelectProperties {
            filter: PropertyFilter::All,
        };
        let by_city = Command::SelectProperties {
            filter: PropertyFilter::City("Lisbon".into()),
        };
        assert_eq!(command_label(&all), "select_properties");
        assert_eq!(command_label(&by_city), "search_properties");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
