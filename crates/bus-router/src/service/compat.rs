//! Legacy delivery quirks.
//!
//! Older routing nodes made a few delivery decisions that later code
//! considers wrong. Peers may still depend on them, so they are reproduced
//! here, after primary filtering, and nowhere else:
//!
//! - A global broadcast DetachSession signal reaches a bus-to-bus link iff
//!   the link is bound to the session being detached.
//! - Sessioncast ignores the destination's off-device restriction.
//! - Sessionless messages from a bus-to-bus link are never pushed directly.
//! - A sessionless sessioncast from a bus-to-bus link with no direct
//!   destination reports success.
//!
//! Compiled only with the `push-compat` feature and applied only while
//! `RouterConfig::push_compat` is set.

use bus_types::{BusResult, EndpointRef, EndpointType};

use super::core::DaemonRouter;
use super::push::RouteContext;

impl DaemonRouter {
    pub(crate) fn add_compatibility_override(
        &self,
        add: bool,
        src: &EndpointRef,
        dest: &EndpointRef,
        ctx: &RouteContext,
    ) -> bool {
        let mut add = add;
        let dest_is_b2b = dest.endpoint_type() == EndpointType::Bus2Bus;

        if ctx.is_broadcast {
            if ctx.global_broadcast && dest_is_b2b && ctx.detach_id != 0 {
                add = dest.session_id() == ctx.detach_id;
            }
        } else if ctx.is_sessioncast && !add {
            add = self.is_session_deliverable(ctx.session_id, src, dest);
        }

        add && !(ctx.src_is_b2b && ctx.sessionless)
    }
}

pub(crate) fn status_compatibility_override(
    status: BusResult<()>,
    ctx: &RouteContext,
    policy_rejected: bool,
) -> BusResult<()> {
    if ctx.is_sessioncast && ctx.src_is_b2b && ctx.sessionless && !policy_rejected {
        return Ok(());
    }
    status
}
