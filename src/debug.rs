/// Datagram hex dumps, enabled by a non-empty `IPMI_BMC_DEBUG`.
pub(crate) const DEBUG_ENV: &str = "IPMI_BMC_DEBUG";

pub(crate) fn enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

pub(crate) fn dump_hex(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    let out = format_dump(label, bytes);

    #[cfg(feature = "tracing")]
    tracing::trace!("{out}");

    #[cfg(not(feature = "tracing"))]
    eprintln!("{out}");
}

fn format_dump(label: &str, bytes: &[u8]) -> String {
    use core::fmt::Write;

    let mut out = String::with_capacity(label.len() + bytes.len() * 3 + 8);
    let _ = write!(out, "{label} ({}):", bytes.len());
    for b in bytes {
        let _ = write!(out, " {b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_format() {
        assert_eq!(
            format_dump("rx", &[0x06, 0x00, 0xFF, 0x07]),
            "rx (4): 06 00 ff 07"
        );
        assert_eq!(format_dump("tx", &[]), "tx (0):");
    }
}
