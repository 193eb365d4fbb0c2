#[cfg(any(feature = "async", feature = "blocking"))]
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Error;
use crate::types::{BootDevice, PrivilegeLevel};

pub(crate) fn request_handled(
    netfn: u8,
    cmd: u8,
    session_id: u32,
    completion_code: u8,
    elapsed: Duration,
) {
    let _ = (netfn, cmd, session_id, completion_code, elapsed);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("bmc_requests_total", "outcome" => "responded").increment(1);
        metrics::histogram!("bmc_request_seconds").record(elapsed.as_secs_f64());
        if completion_code != 0x00 {
            metrics::counter!("bmc_completion_code_nonzero_total").increment(1);
        }
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(
            netfn,
            cmd,
            session_id,
            completion_code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi request handled"
        );
    }
}

pub(crate) fn request_ignored(netfn: u8, cmd: u8) {
    let _ = (netfn, cmd);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_requests_total", "outcome" => "ignored").increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(netfn, cmd, "no response sent");
}

pub(crate) fn datagram_dropped(peer: SocketAddr, err: &Error) {
    let _ = (peer, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_datagrams_dropped_total", "kind" => error_kind(err)).increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(%peer, error = %err, "dropping datagram");
}

pub(crate) fn asf_ping(peer: SocketAddr) {
    let _ = peer;

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_asf_pings_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(%peer, "answering ASF presence ping");
}

pub(crate) fn unsupported_command(peer: SocketAddr, netfn: u8, cmd: u8) {
    let _ = (peer, netfn, cmd);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_unsupported_commands_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::info!(%peer, netfn, cmd, "unsupported command");
}

pub(crate) fn session_not_found(peer: SocketAddr, err: &Error) {
    let _ = (peer, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_session_misses_total", "reason" => "unknown").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(%peer, error = %err, "dropping request");
}

pub(crate) fn session_not_active(peer: SocketAddr, session_id: u32) {
    let _ = (peer, session_id);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_session_misses_total", "reason" => "not_active").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        %peer,
        session_id = format_args!("{session_id:#010x}"),
        "session not activated"
    );
}

pub(crate) fn auth_verified(session_id: u32) {
    let _ = session_id;

    #[cfg(feature = "tracing")]
    tracing::trace!(session_id, "authentication code verified");
}

pub(crate) fn auth_failed(peer: SocketAddr, session_id: u32, err: &Error) {
    let _ = (peer, session_id, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_auth_failures_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        %peer,
        session_id = format_args!("{session_id:#010x}"),
        error = %err,
        "authentication failed"
    );
}

pub(crate) fn unknown_user(peer: SocketAddr) {
    let _ = peer;

    #[cfg(feature = "tracing")]
    tracing::warn!(%peer, "session challenge for unknown user");
}

pub(crate) fn session_opened(session_id: u32, peer: SocketAddr) {
    let _ = (session_id, peer);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_sessions_opened_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::info!(%peer, session_id = format_args!("{session_id:#010x}"), "session challenge issued");
}

pub(crate) fn session_activated(session_id: u32, privilege: PrivilegeLevel) {
    let _ = (session_id, privilege);

    #[cfg(feature = "tracing")]
    tracing::info!(
        session_id = format_args!("{session_id:#010x}"),
        ?privilege,
        "session activated"
    );
}

pub(crate) fn session_closed(session_id: u32) {
    let _ = session_id;

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_sessions_closed_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::info!(session_id = format_args!("{session_id:#010x}"), "session closed");
}

pub(crate) fn session_expired(session_id: u32) {
    let _ = session_id;

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_sessions_reaped_total", "reason" => "idle").increment(1);

    #[cfg(feature = "tracing")]
    tracing::info!(session_id = format_args!("{session_id:#010x}"), "session timed out");
}

pub(crate) fn session_evicted(session_id: u32) {
    let _ = session_id;

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_sessions_reaped_total", "reason" => "evicted").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        session_id = format_args!("{session_id:#010x}"),
        "registry full, dropping oldest pending session"
    );
}

pub(crate) fn insufficient_privilege(
    peer: SocketAddr,
    session_id: u32,
    have: PrivilegeLevel,
    need: PrivilegeLevel,
) {
    let _ = (peer, session_id, have, need);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_privilege_denials_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        %peer,
        session_id = format_args!("{session_id:#010x}"),
        ?have,
        ?need,
        "insufficient privilege"
    );
}

pub(crate) fn session_limit(limit: usize) {
    let _ = limit;

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_session_limit_hits_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(limit, "session registry full");
}

pub(crate) fn challenge_mismatch(session_id: u32, peer: SocketAddr) {
    let _ = (session_id, peer);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        %peer,
        session_id = format_args!("{session_id:#010x}"),
        "activate session with wrong challenge"
    );
}

pub(crate) fn handler_failed(netfn: u8, cmd: u8, err: &Error) {
    let _ = (netfn, cmd, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_handler_errors_total", "kind" => error_kind(err)).increment(1);

    #[cfg(feature = "tracing")]
    tracing::error!(netfn, cmd, error = %err, "failed to build response");
}

pub(crate) fn no_target(local: SocketAddr) {
    let _ = local;

    #[cfg(feature = "tracing")]
    tracing::warn!(%local, "no target configured for this address");
}

pub(crate) fn target_failed(operation: &'static str, err: &Error) {
    let _ = (operation, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_target_errors_total", "operation" => operation).increment(1);

    #[cfg(feature = "tracing")]
    tracing::error!(operation, error = %err, "target operation failed");
}

pub(crate) fn unknown_chassis_control(code: u8) {
    let _ = code;

    #[cfg(feature = "tracing")]
    tracing::info!(code, "ignoring unknown chassis control code");
}

pub(crate) fn boot_device_ignored(vm: &str, device: BootDevice) {
    let _ = (vm, device);

    #[cfg(feature = "tracing")]
    tracing::info!(vm, ?device, "boot device has no VirtualBox equivalent");
}

#[cfg(any(feature = "async", feature = "blocking"))]
pub(crate) fn endpoint_listening(local: SocketAddr) {
    let _ = local;

    #[cfg(feature = "tracing")]
    tracing::info!(%local, "listening");
}

#[cfg(any(feature = "async", feature = "blocking"))]
pub(crate) fn recv_failed(local: SocketAddr, err: &io::Error) {
    let _ = (local, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_io_errors_total", "direction" => "recv").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(%local, error = %err, "receive failed");
}

#[cfg(any(feature = "async", feature = "blocking"))]
pub(crate) fn send_failed(peer: SocketAddr, err: &io::Error) {
    let _ = (peer, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("bmc_io_errors_total", "direction" => "send").increment(1);

    #[cfg(feature = "tracing")]
    tracing::warn!(%peer, error = %err, "send failed");
}

#[cfg(feature = "metrics")]
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Io(_) => "io",
        Error::Protocol(_) | Error::ProtocolOwned(_) => "protocol",
        Error::AuthenticationFailed(_) => "authentication",
        Error::Unsupported(_) => "unsupported",
        Error::InvalidArgument(_) => "invalid_argument",
        Error::SessionNotFound(_) => "session_not_found",
        Error::SessionLimit(_) => "session_limit",
        Error::Config(_) | Error::ConfigParse(_) => "config",
        Error::Target(_) => "target",
    }
}
