//! Per-tunnel spans.
//!
//! Every log line emitted while a tunnel is alive carries its id, variant and
//! target through the span created here.

use tracing::Span;

use crate::net::TunnelId;

pub fn tunnel_span(id: TunnelId, variant: &'static str, target: &str) -> Span {
    tracing::info_span!("tunnel", tunnel_id = %id, variant, target = %target)
}
