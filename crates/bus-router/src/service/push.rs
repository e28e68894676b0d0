//! The `push_message` pipeline.
//!
//! Every candidate destination passes through the same filters:
//!
//! | Filter | Check                                                   |
//! |--------|---------------------------------------------------------|
//! | 1      | Policy allows send and receive                          |
//! | 2      | Destination accepts off-device messages                 |
//! | 3      | Reply from the destination would reach the sender       |
//! | 4      | Unicast: destination owns the requested name            |
//! | 5      | Broadcast: global to a bus-to-bus link, or a rule match |
//! | 6      | Sessioncast: both ends in the session                   |
//!
//! Sessionless broadcasts go to the sessionless collaborator instead.

use bus_telemetry::{
    log_event, time_histogram, MESSAGES_ROUTED, PUSH_DURATION, ROUTE_FAILURES, SUBSYSTEM_ROUTER,
};
use bus_types::{
    same_endpoint, BusError, BusResult, EndpointRef, EndpointType, Message, MsgArg, SessionId,
};

use super::core::DaemonRouter;
use crate::ports::MessageRouter;

/// Interface of the inter-router control object.
pub const DAEMON_INTERFACE: &str = "org.alljoyn.Daemon";

/// Control signal announcing that a session is being torn down.
pub const DETACH_SESSION_MEMBER: &str = "DetachSession";

/// Error name of synthesized replies for undeliverable method calls.
pub const BLOCKED_ERROR_NAME: &str = "org.alljoyn.Bus.Blocked";

/// Everything the filters need to know about one message and its sender.
pub(crate) struct RouteContext {
    pub(crate) session_id: SessionId,
    pub(crate) detach_id: SessionId,
    pub(crate) is_unicast: bool,
    pub(crate) is_broadcast: bool,
    pub(crate) is_sessioncast: bool,
    pub(crate) reply_expected: bool,
    pub(crate) sessionless: bool,
    pub(crate) global_broadcast: bool,
    pub(crate) src_is_b2b: bool,
    pub(crate) src_allows_remote: bool,
}

impl RouteContext {
    fn new(msg: &Message, src: &EndpointRef) -> Self {
        let is_unicast = !msg.destination.is_empty();
        let src_is_b2b = src.endpoint_type() == EndpointType::Bus2Bus;
        Self {
            session_id: msg.session_id,
            detach_id: detach_session_id(msg),
            is_unicast,
            is_broadcast: !is_unicast && msg.session_id == 0,
            is_sessioncast: !is_unicast && msg.session_id != 0,
            reply_expected: msg.reply_expected(),
            sessionless: msg.is_sessionless(),
            global_broadcast: msg.is_global_broadcast(),
            src_is_b2b,
            src_allows_remote: src.allow_remote_messages(),
        }
    }
}

/// Why a candidate failed before the type-specific filters.
enum Rejection {
    RemoteBlocked,
    ReplyBlocked,
}

#[derive(Default)]
struct Selection {
    destinations: Vec<EndpointRef>,
    blocked: bool,
    blocked_reply: bool,
    policy_rejected: bool,
}

/// Session id being detached, when `msg` is the inter-router DetachSession
/// signal. The message itself is left untouched.
fn detach_session_id(msg: &Message) -> SessionId {
    if msg.member != DETACH_SESSION_MEMBER || msg.interface != DAEMON_INTERFACE {
        return 0;
    }
    match msg.arg(0).and_then(MsgArg::as_u32) {
        Some(id) => id,
        None => {
            log_event!(warn, SUBSYSTEM_ROUTER, "DetachSession without a session id argument");
            0
        }
    }
}

fn routing_kind(msg: &Message) -> &'static str {
    match (msg.destination.is_empty(), msg.session_id) {
        (false, _) => "unicast",
        (true, 0) => "broadcast",
        (true, _) => "sessioncast",
    }
}

fn is_direct(endpoint: &EndpointRef) -> bool {
    endpoint.endpoint_type().is_direct()
}

fn send_through_endpoint(msg: &Message, endpoint: &EndpointRef, session_id: SessionId) -> BusResult<()> {
    let result = if session_id != 0 && endpoint.endpoint_type() == EndpointType::Virtual {
        endpoint.push_session_message(msg, session_id)
    } else {
        endpoint.push_message(msg)
    };
    if let Err(e) = &result {
        // Closing and stopping endpoints are expected during teardown.
        if !e.is_transient_delivery() {
            log_event!(
                debug,
                SUBSYSTEM_ROUTER,
                "send through endpoint failed",
                dest = %endpoint.unique_name(),
                session_id = session_id,
                error = %e
            );
        }
    }
    result
}

impl DaemonRouter {
    pub(crate) fn route_and_record(&self, msg: &Message, src: &EndpointRef) -> BusResult<()> {
        let _timer = time_histogram!(PUSH_DURATION);
        let result = self.route(msg, src);
        match &result {
            Ok(()) => MESSAGES_ROUTED
                .with_label_values(&[routing_kind(msg)])
                .inc(),
            Err(e) => ROUTE_FAILURES.with_label_values(&[e.status_name()]).inc(),
        }
        result
    }

    fn route(&self, msg: &Message, src: &EndpointRef) -> BusResult<()> {
        // Virtual endpoints stand in for remote names and never originate traffic.
        if src.endpoint_type() == EndpointType::Virtual {
            return Err(BusError::NoRoute);
        }

        let local = self.local_endpoint();
        let Some(local) = local.filter(|ep| ep.is_valid()) else {
            return Err(BusError::EndpointClosing);
        };

        let ctx = RouteContext::new(msg, src);
        log_event!(
            trace,
            SUBSYSTEM_ROUTER,
            "routing message",
            msg = %msg.description(),
            serial = msg.serial,
            src = %src.unique_name(),
            kind = routing_kind(msg),
            sessionless = ctx.sessionless
        );

        let candidates = self.candidates(msg, &ctx);
        let selection = self.select_destinations(msg, src, &ctx, candidates);

        let mut status = self.route_sessionless(msg, src, &ctx, selection.policy_rejected);

        if !selection.destinations.is_empty() {
            // A DetachSession signal travels over the session being detached.
            let session_id = if ctx.detach_id != 0 {
                ctx.detach_id
            } else {
                ctx.session_id
            };
            status = Some(deliver(msg, &selection.destinations, session_id, status));
        }

        let status = status.unwrap_or_else(|| {
            let status = if selection.policy_rejected {
                Err(BusError::PolicyViolation)
            } else {
                Err(BusError::NoRoute)
            };
            self.apply_status_compat(status, &ctx, selection.policy_rejected)
        });

        if status.is_err() && ctx.reply_expected && !ctx.src_is_b2b {
            self.send_blocked_reply(msg, &selection, &local);
        }
        status
    }

    fn candidates(&self, msg: &Message, ctx: &RouteContext) -> Vec<EndpointRef> {
        let mut candidates = if ctx.is_unicast {
            self.name_table
                .find_endpoint(&msg.destination)
                .filter(|ep| ep.is_valid())
                .into_iter()
                .collect()
        } else {
            self.name_table.all_endpoints()
        };
        if !ctx.is_unicast || candidates.is_empty() {
            candidates.extend(self.b2b_endpoints());
        }
        candidates
    }

    fn select_destinations(
        &self,
        msg: &Message,
        src: &EndpointRef,
        ctx: &RouteContext,
        candidates: Vec<EndpointRef>,
    ) -> Selection {
        let mut selection = Selection::default();

        for dest in candidates {
            let dest_is_direct =
                ctx.is_unicast && self.name_table.is_alias(dest.unique_name(), &msg.destination);

            // Filter 1: policy
            if !self.policy_allows(msg, src, &dest) {
                log_event!(trace, SUBSYSTEM_ROUTER, "policy rejected", dest = %dest.unique_name());
                selection.policy_rejected = true;
                continue;
            }

            let add = match self.admits(msg, src, &dest, ctx, dest_is_direct) {
                Ok(add) => add,
                Err(rejection) => {
                    match rejection {
                        Rejection::RemoteBlocked => selection.blocked |= dest_is_direct,
                        Rejection::ReplyBlocked => selection.blocked_reply |= dest_is_direct,
                    }
                    if !self.compat_active() {
                        continue;
                    }
                    false
                }
            };

            if self.apply_add_compat(add, src, &dest, ctx) {
                selection.destinations.push(dest);
            }
        }
        selection
    }

    fn policy_allows(&self, msg: &Message, src: &EndpointRef, dest: &EndpointRef) -> bool {
        self.policy.as_ref().map_or(true, |policy| {
            policy.ok_to_send(msg, src, dest) && policy.ok_to_receive(msg, dest)
        })
    }

    /// Filters 2 through 6.
    fn admits(
        &self,
        msg: &Message,
        src: &EndpointRef,
        dest: &EndpointRef,
        ctx: &RouteContext,
        dest_is_direct: bool,
    ) -> Result<bool, Rejection> {
        let both_ours = !ctx.src_is_b2b && is_direct(dest);

        // Filter 2: off-device messages
        if !(dest.allow_remote_messages() || both_ours) {
            log_event!(trace, SUBSYSTEM_ROUTER, "blocked: remote messages not allowed", dest = %dest.unique_name());
            return Err(Rejection::RemoteBlocked);
        }

        // Filter 3: the reply would come from off-device
        if !(!ctx.reply_expected || ctx.src_allows_remote || both_ours) {
            log_event!(trace, SUBSYSTEM_ROUTER, "blocked: remote reply not allowed", dest = %dest.unique_name());
            return Err(Rejection::ReplyBlocked);
        }

        // Filter 4: unicast name ownership
        if ctx.is_unicast {
            return Ok(dest_is_direct);
        }

        // Filter 5: broadcast
        if ctx.is_broadcast {
            let global_to_link = ctx.global_broadcast
                && dest.endpoint_type() == EndpointType::Bus2Bus
                && !same_endpoint(src, dest);
            return Ok(global_to_link || self.rule_table.ok_to_send(msg, dest.unique_name()));
        }

        // Filter 6: sessioncast
        Ok(self.is_session_deliverable(ctx.session_id, src, dest))
    }

    /// Both ends in the session, destination not virtual, and self-delivery
    /// only after a self-join.
    pub(crate) fn is_session_deliverable(
        &self,
        session_id: SessionId,
        src: &EndpointRef,
        dest: &EndpointRef,
    ) -> bool {
        src.is_in_session(session_id)
            && dest.is_in_session(session_id)
            && dest.endpoint_type() != EndpointType::Virtual
            && (!same_endpoint(src, dest) || self.is_self_joined(src.unique_name(), session_id))
    }

    fn route_sessionless(
        &self,
        msg: &Message,
        src: &EndpointRef,
        ctx: &RouteContext,
        policy_rejected: bool,
    ) -> Option<BusResult<()>> {
        if !ctx.sessionless || policy_rejected || !(ctx.is_broadcast || ctx.src_is_b2b) {
            return None;
        }
        let sessionless = self.sessionless.as_ref()?;
        if ctx.src_is_b2b {
            // Catch-up traffic rides a temporary session owned by the link.
            sessionless.route_sessionless_message(src.session_id(), msg);
            Some(Ok(()))
        } else {
            Some(sessionless.push_message(msg))
        }
    }

    fn send_blocked_reply(&self, msg: &Message, selection: &Selection, local: &EndpointRef) {
        let reason = if selection.policy_rejected {
            "policy rule denies message delivery."
        } else if selection.blocked {
            "endpoint does not accept off device messages."
        } else if selection.blocked_reply {
            "reply from off device endpoint would be blocked."
        } else {
            "destination does not exist."
        };
        let description = format!(
            "Remote method call blocked -- {reason}  Destination = {}",
            msg.destination
        );
        log_event!(debug, SUBSYSTEM_ROUTER, "sending error auto reply", description = %description);

        let reply = Message::error_reply(msg, BLOCKED_ERROR_NAME, &description);
        if let Err(e) = self.push_message(&reply, local) {
            log_event!(debug, SUBSYSTEM_ROUTER, "error auto reply undeliverable", error = %e);
        }
    }

    pub(crate) fn compat_active(&self) -> bool {
        cfg!(feature = "push-compat") && self.config.push_compat
    }

    #[cfg(feature = "push-compat")]
    fn apply_add_compat(&self, add: bool, src: &EndpointRef, dest: &EndpointRef, ctx: &RouteContext) -> bool {
        if self.config.push_compat {
            self.add_compatibility_override(add, src, dest, ctx)
        } else {
            add
        }
    }

    #[cfg(not(feature = "push-compat"))]
    fn apply_add_compat(&self, add: bool, _: &EndpointRef, _: &EndpointRef, _: &RouteContext) -> bool {
        add
    }

    #[cfg(feature = "push-compat")]
    fn apply_status_compat(&self, status: BusResult<()>, ctx: &RouteContext, policy_rejected: bool) -> BusResult<()> {
        if self.config.push_compat {
            super::compat::status_compatibility_override(status, ctx, policy_rejected)
        } else {
            status
        }
    }

    #[cfg(not(feature = "push-compat"))]
    fn apply_status_compat(&self, status: BusResult<()>, _: &RouteContext, _: bool) -> BusResult<()> {
        status
    }
}

/// Push to every selected destination. One failure never stops the others.
///
/// A failure already reported by the sessionless collaborator wins, then the
/// first hard failure. Closing or stopping endpoints only surface when no
/// destination accepted the message.
fn deliver(
    msg: &Message,
    destinations: &[EndpointRef],
    session_id: SessionId,
    prior: Option<BusResult<()>>,
) -> BusResult<()> {
    let mut delivered = false;
    let mut hard: Option<BusError> = None;
    let mut transient: Option<BusError> = None;

    for dest in destinations {
        match send_through_endpoint(msg, dest, session_id) {
            Ok(()) => delivered = true,
            Err(e) if e.is_transient_delivery() => {
                transient.get_or_insert(e);
            }
            Err(e) => {
                hard.get_or_insert(e);
            }
        }
    }

    if let Some(Err(e)) = prior {
        return Err(e);
    }
    if let Some(e) = hard {
        return Err(e);
    }
    match transient {
        Some(e) if !delivered => Err(e),
        _ => Ok(()),
    }
}
