// ABOUTME: Turns raw pane activity into an attention state, escalating static screens to the analyzer
//
// Busy ticks resolve to working on the spot. A static screen is first checked
// against the signal cache and the local busy markers; only a screen that is
// still ambiguous goes to the analyzer. The decision and the in-flight request
// id are written under one registry lock so two ticks can never both escalate.

pub mod analyzer;
pub mod heuristics;

pub use analyzer::{
    AnalysisRequest, AnalysisVerdict, AnalyzedState, AnalyzerError, ClaudeAnalyzer,
    DisabledAnalyzer, PaneAnalyzer,
};

use crate::models::{AttentionState, PaneId, RequestId, Session, SignalCache, SignalVerdict};
use crate::registry::PaneRegistry;
use crate::tmux::Multiplexer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Raw activity inferred by diffing consecutive captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawActivity {
    Busy,
    Static,
}

#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub content: &'a str,
    pub activity: RawActivity,
    /// The user typed into this pane recently
    pub user_typing: bool,
}

/// What a single observation did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Working,
    Escalated(RequestId),
    /// A request is already in flight
    InFlight,
    /// Escalation suppressed by the typing signal
    Suppressed,
    /// Screen already judged ambiguous; nothing new to ask
    Settled,
    /// Session no longer exists
    Unknown,
}

/// Final effect of an analyzer response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Idle,
    Waiting,
    /// Waiting, then the first option was accepted on autopilot
    AutoAccepted,
    /// Analyzer failed; session set idle with an error note
    Failed,
    /// Response for a superseded request, or the session is gone
    Discarded,
}

enum Applied {
    Idle,
    Waiting { autopilot: Option<(String, Vec<String>)> },
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    pub timeout: Duration,
    pub excerpt_lines: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            excerpt_lines: 50,
        }
    }
}

#[derive(Clone)]
pub struct StatusClassifier {
    registry: Arc<PaneRegistry>,
    analyzer: Arc<dyn PaneAnalyzer>,
    mux: Arc<dyn Multiplexer>,
    settings: ClassifierSettings,
}

fn mark_working(session: &mut Session) {
    if session.attention != AttentionState::Working {
        session.set_attention(AttentionState::Working);
    }
}

fn decide(session: &mut Session, obs: &Observation<'_>, digest: u64) -> Decision {
    if obs.activity == RawActivity::Busy {
        // Fresh output invalidates whatever judgment is pending or cached;
        // the screen may come back to an earlier digest in a new state
        session.analysis_request = None;
        session.signal_cache = None;
        mark_working(session);
        return Decision::Working;
    }

    if session.analysis_request.is_some() {
        return Decision::InFlight;
    }
    if obs.user_typing {
        return Decision::Suppressed;
    }

    if let Some(cache) = session.signal_cache.filter(|c| c.digest == digest) {
        return match cache.verdict {
            SignalVerdict::Working => {
                mark_working(session);
                Decision::Working
            }
            SignalVerdict::Ambiguous => Decision::Settled,
        };
    }

    if heuristics::shows_busy_marker(session.agent, obs.content) {
        session.signal_cache = Some(SignalCache {
            digest,
            verdict: SignalVerdict::Working,
        });
        mark_working(session);
        return Decision::Working;
    }

    let request = RequestId::new();
    session.signal_cache = Some(SignalCache {
        digest,
        verdict: SignalVerdict::Ambiguous,
    });
    session.analysis_request = Some(request);
    session.set_attention(AttentionState::Analyzing);
    Decision::Escalated(request)
}

impl StatusClassifier {
    pub fn new(
        registry: Arc<PaneRegistry>,
        analyzer: Arc<dyn PaneAnalyzer>,
        mux: Arc<dyn Multiplexer>,
        settings: ClassifierSettings,
    ) -> Self {
        Self {
            registry,
            analyzer,
            mux,
            settings,
        }
    }

    /// Apply one monitor tick. Escalations are dispatched on a background task.
    pub fn observe(&self, id: PaneId, obs: Observation<'_>) -> Decision {
        let digest = heuristics::screen_digest(obs.content);
        let decision = self
            .registry
            .update_with(id, |session| decide(session, &obs, digest))
            .unwrap_or(Decision::Unknown);

        match decision {
            Decision::Escalated(request) => {
                debug!("Pane {} static and ambiguous, escalating", id.short());
                self.dispatch(id, request, obs.content);
            }
            Decision::Suppressed => debug!("Pane {} static while user typing", id.short()),
            _ => {}
        }
        decision
    }

    /// Force a fresh classification of `content`, superseding any pending request
    pub fn refresh(&self, id: PaneId, content: &str) -> Option<RequestId> {
        let request = self.registry.update_with(id, |session| {
            let request = RequestId::new();
            session.signal_cache = Some(SignalCache {
                digest: heuristics::screen_digest(content),
                verdict: SignalVerdict::Ambiguous,
            });
            session.analysis_request = Some(request);
            session.set_attention(AttentionState::Analyzing);
            request
        })?;
        info!("Status refresh requested for pane {}", id.short());
        self.dispatch(id, request, content);
        Some(request)
    }

    /// Forget the pending request so a late response is discarded
    pub fn invalidate(&self, id: PaneId) {
        self.registry.update(id, |session| session.analysis_request = None);
    }

    fn dispatch(&self, id: PaneId, request: RequestId, content: &str) {
        let agent = self.registry.get(id).and_then(|s| s.agent);
        let analysis = AnalysisRequest {
            agent,
            excerpt: heuristics::excerpt(content, self.settings.excerpt_lines),
        };
        let classifier = self.clone();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(
                classifier.settings.timeout,
                classifier.analyzer.analyze(&analysis),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AnalyzerError::Timeout),
            };
            if let Err(e) = &result {
                warn!("Analyzer failed for pane {}: {}", id.short(), e);
            }
            classifier.resolve(id, request, result).await;
        });
    }

    /// Apply an analyzer response if `request` is still the session's in-flight id
    pub async fn resolve(
        &self,
        id: PaneId,
        request: RequestId,
        result: Result<AnalysisVerdict, AnalyzerError>,
    ) -> Resolution {
        let applied = self
            .registry
            .update_with(id, |session| {
                if session.analysis_request != Some(request) {
                    return None;
                }
                session.analysis_request = None;

                let verdict = match result {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        session.set_attention(AttentionState::Idle);
                        session.analyzer_error = Some(e.to_string());
                        return Some(Applied::Failed);
                    }
                };
                session.analyzer_error = None;

                match verdict.state {
                    AnalyzedState::Idle => {
                        session.set_attention(AttentionState::Idle);
                        Some(Applied::Idle)
                    }
                    AnalyzedState::Waiting => {
                        let autopilot = (session.autopilot && !verdict.prompt.is_risky())
                            .then(|| verdict.prompt.options.first())
                            .flatten()
                            .filter(|option| !option.keys.is_empty())
                            .map(|option| (session.pane_handle.clone(), option.keys.clone()));
                        session.set_attention(AttentionState::Waiting);
                        session.waiting_prompt = Some(verdict.prompt);
                        Some(Applied::Waiting { autopilot })
                    }
                }
            })
            .flatten();

        match applied {
            None => {
                debug!("Discarding stale analyzer response for pane {}", id.short());
                Resolution::Discarded
            }
            Some(Applied::Idle) => Resolution::Idle,
            Some(Applied::Failed) => Resolution::Failed,
            Some(Applied::Waiting { autopilot: None }) => {
                info!("Pane {} is waiting for input", id.short());
                Resolution::Waiting
            }
            Some(Applied::Waiting {
                autopilot: Some((handle, keys)),
            }) => self.accept_first_option(id, &handle, &keys).await,
        }
    }

    async fn accept_first_option(&self, id: PaneId, handle: &str, keys: &[String]) -> Resolution {
        if let Err(e) = self.mux.send_keys(handle, keys).await {
            warn!("Autopilot could not answer pane {}: {}", id.short(), e);
            return Resolution::Waiting;
        }
        info!("Autopilot accepted {:?} on pane {}", keys, id.short());
        self.registry.update(id, |session| {
            if session.attention == AttentionState::Waiting && session.analysis_request.is_none() {
                session.set_attention(AttentionState::Working);
            }
        });
        Resolution::AutoAccepted
    }
}
