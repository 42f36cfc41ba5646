use std::time::Duration;

use crate::error::Error;

pub(crate) fn record_ok(device: &str, netfn: u8, cmd: u8, elapsed: Duration, completion_code: u8) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("mch_ipmi_requests_total", "outcome" => "ok").increment(1);
        metrics::histogram!("mch_ipmi_request_seconds").record(elapsed.as_secs_f64());
        if completion_code != 0x00 {
            metrics::counter!("mch_ipmi_completion_code_nonzero_total").increment(1);
        }
    }

    tracing::debug!(
        device,
        netfn,
        cmd,
        completion_code,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "ipmi request ok"
    );
}

pub(crate) fn record_err(device: &str, netfn: u8, cmd: u8, elapsed: Duration, err: &Error) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("mch_ipmi_requests_total", "outcome" => "err").increment(1);
        metrics::counter!(
            "mch_ipmi_request_errors_total",
            "kind" => err.kind().as_str()
        )
        .increment(1);
        metrics::histogram!("mch_ipmi_request_seconds").record(elapsed.as_secs_f64());
    }

    tracing::debug!(
        device,
        netfn,
        cmd,
        error = %err,
        kind = err.kind().as_str(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "ipmi request failed"
    );
}

pub(crate) fn record_reconnect(device: &str, streak: u32) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("mch_ipmi_forced_reconnects_total").increment(1);
    }

    tracing::warn!(device, streak, "error streak exceeded, closing session");
}
