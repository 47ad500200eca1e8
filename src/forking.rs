//! Minimal call-forking controller: a master/slave state machine wired
//! as one more consumer of the message bus, included only far enough to
//! exercise the post-hook/handler machinery end to end.

use pbx_bus::prelude::{Bus, Message};
use std::sync::Mutex;

/// A target line's optional batch-timing modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkModifier {
    /// `|next=N`: this target (and everything after it, up to the next
    /// modifier) dispatches N milliseconds after the previous batch.
    Next(u64),
    /// `|drop=N`: drop every still-pending leg N milliseconds after the
    /// batch containing this modifier was dispatched.
    Drop(u64),
    /// `|exec=N`: dispatch this target N milliseconds after the cascade
    /// starts, independent of batching.
    ExecAfter(u64),
    /// `|exec`: dispatch this target immediately, alongside the first
    /// batch.
    ExecNow,
}

#[derive(Debug, Clone)]
pub struct ForkTarget {
    pub callto: String,
    pub modifier: Option<ForkModifier>,
}

/// Parses one target line of the form `callto` or `callto|next=200`.
pub fn parse_target(line: &str) -> ForkTarget {
    let Some((callto, suffix)) = line.split_once('|') else {
        return ForkTarget { callto: line.to_string(), modifier: None };
    };

    let modifier = if suffix == "exec" {
        Some(ForkModifier::ExecNow)
    } else if let Some(value) = suffix.strip_prefix("next=") {
        value.parse().ok().map(ForkModifier::Next)
    } else if let Some(value) = suffix.strip_prefix("drop=") {
        value.parse().ok().map(ForkModifier::Drop)
    } else if let Some(value) = suffix.strip_prefix("exec=") {
        value.parse().ok().map(ForkModifier::ExecAfter)
    } else {
        None
    };

    ForkTarget { callto: callto.to_string(), modifier }
}

struct Leg {
    target: ForkTarget,
    dispatched: bool,
    answered: bool,
    dropped: bool,
}

/// Whether `reason` should shorten the cascade, per `fork.stop` (optionally
/// `^`-suffixed for reverse match).
pub fn stop_on_reason_matches(pattern: &str, reason: &str) -> bool {
    if let Some(inner) = pattern.strip_suffix('^') {
        reason != inner
    } else {
        reason == pattern
    }
}

/// One master call's fork state: a list of slave legs, which (if any) has
/// connected, and the fake-media policy for targets with no media source.
pub struct ForkController {
    master_id: String,
    legs: Mutex<Vec<Leg>>,
    fake_media: bool,
    stop_on_reason: Option<String>,
    connected: Mutex<Option<usize>>,
}

/// Attaches a synthesised media source to a leg that doesn't yet have
/// one. The concrete media subsystem decides what "no format" means; this
/// crate only fixes the hook it is called through.
pub trait FakeMediaSource: Send + Sync {
    fn attach(&self, leg_callto: &str);
}

impl ForkController {
    pub fn new(master_id: impl Into<String>, targets: Vec<String>, fake_media: bool, stop_on_reason: Option<String>) -> Self {
        let legs = targets
            .into_iter()
            .map(|line| Leg { target: parse_target(&line), dispatched: false, answered: false, dropped: false })
            .collect();
        Self {
            master_id: master_id.into(),
            legs: Mutex::new(legs),
            fake_media,
            stop_on_reason,
            connected: Mutex::new(None),
        }
    }

    pub fn master_id(&self) -> &str {
        &self.master_id
    }

    pub fn fake_media(&self) -> bool {
        self.fake_media
    }

    pub fn leg_count(&self) -> usize {
        self.legs.lock().unwrap().len()
    }

    pub fn connected_leg(&self) -> Option<usize> {
        *self.connected.lock().unwrap()
    }

    /// Dispatches every leg that has no modifier or `ExecNow`, via
    /// `call.execute`. A leg whose message comes back handled counts as
    /// answered and becomes the connected leg if none has connected yet.
    pub fn dispatch_first_batch(&self, bus: &Bus, media: Option<&dyn FakeMediaSource>, now_ms: u64) -> Vec<usize> {
        let mut legs = self.legs.lock().unwrap();
        let mut dispatched = Vec::new();

        for (index, leg) in legs.iter_mut().enumerate() {
            if leg.dispatched || leg.dropped {
                continue;
            }
            if matches!(leg.target.modifier, Some(ForkModifier::Next(_)) | Some(ForkModifier::ExecAfter(_))) {
                continue;
            }
            leg.dispatched = true;
            dispatched.push(index);

            let message = Message::new("call.execute", false, now_ms);
            message.set_param("callto", leg.target.callto.clone());
            let handled = bus.dispatch(&message);
            if handled {
                leg.answered = true;
                if self.fake_media {
                    if let Some(media) = media {
                        media.attach(&leg.target.callto);
                    }
                }
            }
        }

        drop(legs);
        self.settle_connection();
        dispatched
    }

    /// First answered, still-undropped leg becomes the connection; every
    /// other leg still pending is marked dropped.
    fn settle_connection(&self) {
        let mut connected = self.connected.lock().unwrap();
        if connected.is_some() {
            return;
        }
        let mut legs = self.legs.lock().unwrap();
        let winner = legs.iter().position(|l| l.answered && !l.dropped);
        if let Some(winner) = winner {
            *connected = Some(winner);
            for (index, leg) in legs.iter_mut().enumerate() {
                if index != winner {
                    leg.dropped = true;
                }
            }
        }
    }

    /// `fork.stop` matched this reason: drops every leg still pending.
    pub fn stop_cascade(&self, reason: &str) -> bool {
        let should_stop = self.stop_on_reason.as_deref().is_some_and(|p| stop_on_reason_matches(p, reason));
        if should_stop {
            let mut legs = self.legs.lock().unwrap();
            for leg in legs.iter_mut() {
                if !leg.answered {
                    leg.dropped = true;
                }
            }
        }
        should_stop
    }

    pub fn is_leg_dropped(&self, index: usize) -> bool {
        self.legs.lock().unwrap().get(index).map(|l| l.dropped).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_recognizes_every_modifier() {
        assert!(matches!(parse_target("sip/a").modifier, None));
        assert!(matches!(parse_target("sip/a|exec").modifier, Some(ForkModifier::ExecNow)));
        assert!(matches!(parse_target("sip/a|next=200").modifier, Some(ForkModifier::Next(200))));
        assert!(matches!(parse_target("sip/a|drop=500").modifier, Some(ForkModifier::Drop(500))));
        assert!(matches!(parse_target("sip/a|exec=100").modifier, Some(ForkModifier::ExecAfter(100))));
    }

    #[test]
    fn stop_on_reason_supports_reverse_match() {
        assert!(stop_on_reason_matches("busy", "busy"));
        assert!(!stop_on_reason_matches("busy", "noanswer"));
        assert!(stop_on_reason_matches("busy^", "noanswer"));
        assert!(!stop_on_reason_matches("busy^", "busy"));
    }

    #[test]
    fn first_answered_leg_wins_and_others_are_dropped() {
        let bus = Bus::new();
        struct AlwaysAnswers;
        impl pbx_bus::prelude::HandlerTarget for AlwaysAnswers {
            fn invoke(&self, _message: &Message, _handled: Option<bool>) -> pbx_core::prelude::CoreResult<pbx_core::prelude::Operation> {
                Ok(pbx_core::prelude::Operation::boolean(true))
            }
        }
        bus.install_handler(pbx_bus::prelude::Handle::new(
            "answer-all",
            0,
            None,
            false,
            pbx_bus::prelude::HandleVariant::Regular,
            std::sync::Arc::new(AlwaysAnswers),
        ));

        let controller = ForkController::new("chan/master", vec!["sip/a".into(), "sip/b".into()], false, None);
        controller.dispatch_first_batch(&bus, None, 0);
        assert_eq!(controller.connected_leg(), Some(0));
        assert!(controller.is_leg_dropped(1));
    }

    #[test]
    fn no_answer_leaves_no_connection() {
        let bus = Bus::new();
        let controller = ForkController::new("chan/master", vec!["sip/a".into()], false, None);
        controller.dispatch_first_batch(&bus, None, 0);
        assert_eq!(controller.connected_leg(), None);
    }

    #[test]
    fn stop_cascade_drops_every_pending_leg_on_match() {
        let bus = Bus::new();
        let controller = ForkController::new("chan/master", vec!["sip/a".into(), "sip/b".into()], false, Some("busy".into()));
        controller.dispatch_first_batch(&bus, None, 0);
        assert!(controller.stop_cascade("busy"));
        assert!(controller.is_leg_dropped(0));
        assert!(controller.is_leg_dropped(1));
    }
}
