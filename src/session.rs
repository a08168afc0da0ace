//! Recording session state machine.
//!
//! [`transition`] is a pure function from the current state and an incoming
//! event to the next state plus the effects the caller has to carry out.
//! Devices, timers and the analysis call live in [`crate::controller`].

use chrono::{DateTime, FixedOffset};

use crate::export::{self, ExportArtifact};
use crate::models::SessionReport;

/// Countdown ceiling for one recording, in seconds (45 minutes).
pub const RECORDING_CEILING_SECS: u32 = 45 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub student_id: String,
    pub student_name: String,
    pub teacher_name: String,
    pub started_at: DateTime<FixedOffset>,
    pub ceiling_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Capture was asked to stop; trailing bytes have not arrived yet.
    Draining { fragments: Vec<Vec<u8>> },
    /// The payload went out to the analysis service.
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording {
        session: SessionInfo,
        remaining_secs: u32,
        fragments: Vec<Vec<u8>>,
    },
    Analyzing {
        session: SessionInfo,
        remaining_secs: u32,
        phase: Phase,
    },
    Complete {
        session: SessionInfo,
        remaining_secs: u32,
        report: SessionReport,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording { .. } => "recording",
            Self::Analyzing { .. } => "analyzing",
            Self::Complete { .. } => "complete",
        }
    }

    pub fn remaining_secs(&self) -> Option<u32> {
        match self {
            Self::Idle => None,
            Self::Recording { remaining_secs, .. }
            | Self::Analyzing { remaining_secs, .. }
            | Self::Complete { remaining_secs, .. } => Some(*remaining_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `session` is `None` when no student has been selected.
    Start { session: Option<SessionInfo> },
    DeviceFailed { reason: String },
    Fragment(Vec<u8>),
    Tick,
    Stop,
    CaptureClosed { trailing: Vec<u8>, mime_type: String },
    AnalysisFinished(Result<SessionReport, String>),
    Export,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::DeviceFailed { .. } => "device_failed",
            Self::Fragment(_) => "fragment",
            Self::Tick => "tick",
            Self::Stop => "stop",
            Self::CaptureClosed { .. } => "capture_closed",
            Self::AnalysisFinished(_) => "analysis_finished",
            Self::Export => "export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    MediaAccessDenied { reason: String },
    EmptyRecording,
    AnalysisFailed { reason: String },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Self::MediaAccessDenied { .. } => "Media Access Denied",
            Self::EmptyRecording => "Recording Error",
            Self::AnalysisFailed { .. } => "AI Analysis Failed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::MediaAccessDenied { .. } => {
                "Please enable camera and microphone permissions to record."
            }
            Self::EmptyRecording => "No audio was recorded. Please check your microphone.",
            Self::AnalysisFailed { .. } => "Could not analyze the session. Please try again.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AcquireDevices,
    ArmTimer,
    CancelTimer,
    StopCapture,
    SubmitAnalysis(AudioPayload),
    Notify(Notice),
    WriteExport(ExportArtifact),
}

fn assemble(fragments: Vec<Vec<u8>>, trailing: Vec<u8>) -> Vec<u8> {
    let mut bytes: Vec<u8> = fragments.into_iter().flatten().collect();
    bytes.extend(trailing);
    bytes
}

fn validate(report: SessionReport) -> Result<SessionReport, String> {
    if report.transcript.trim().is_empty() {
        return Err("analysis returned no transcript".to_string());
    }
    if report.evaluation.trim().is_empty() {
        return Err("analysis returned no evaluation".to_string());
    }
    Ok(report)
}

pub fn transition(state: SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    use SessionState::*;

    match (state, event) {
        (Idle | Complete { .. }, Event::Start { session: Some(session) })
            if !session.student_id.is_empty() =>
        {
            let remaining_secs = session.ceiling_secs;
            (
                Recording {
                    session,
                    remaining_secs,
                    fragments: Vec::new(),
                },
                vec![Effect::AcquireDevices, Effect::ArmTimer],
            )
        }

        (Recording { .. }, Event::DeviceFailed { reason }) => (
            Idle,
            vec![
                Effect::CancelTimer,
                Effect::Notify(Notice::MediaAccessDenied { reason }),
            ],
        ),

        (
            Recording {
                session,
                remaining_secs,
                mut fragments,
            },
            Event::Fragment(bytes),
        ) => {
            if !bytes.is_empty() {
                fragments.push(bytes);
            }
            (
                Recording {
                    session,
                    remaining_secs,
                    fragments,
                },
                Vec::new(),
            )
        }

        (
            Recording {
                session,
                remaining_secs,
                fragments,
            },
            Event::Tick,
        ) if remaining_secs > 1 => (
            Recording {
                session,
                remaining_secs: remaining_secs - 1,
                fragments,
            },
            Vec::new(),
        ),

        (
            Recording {
                session,
                remaining_secs,
                fragments,
            },
            event @ (Event::Tick | Event::Stop),
        ) => {
            let remaining_secs = if event == Event::Tick { 0 } else { remaining_secs };
            (
                Analyzing {
                    session,
                    remaining_secs,
                    phase: Phase::Draining { fragments },
                },
                vec![Effect::CancelTimer, Effect::StopCapture],
            )
        }

        (
            Analyzing {
                session,
                remaining_secs,
                phase: Phase::Draining { mut fragments },
            },
            Event::Fragment(bytes),
        ) => {
            if !bytes.is_empty() {
                fragments.push(bytes);
            }
            (
                Analyzing {
                    session,
                    remaining_secs,
                    phase: Phase::Draining { fragments },
                },
                Vec::new(),
            )
        }

        (
            Analyzing {
                session,
                remaining_secs,
                phase: Phase::Draining { fragments },
            },
            Event::CaptureClosed {
                trailing,
                mime_type,
            },
        ) => {
            let bytes = assemble(fragments, trailing);
            if bytes.is_empty() {
                return (Idle, vec![Effect::Notify(Notice::EmptyRecording)]);
            }
            (
                Analyzing {
                    session,
                    remaining_secs,
                    phase: Phase::Submitted,
                },
                vec![Effect::SubmitAnalysis(AudioPayload { mime_type, bytes })],
            )
        }

        (
            Analyzing {
                session,
                remaining_secs,
                phase: Phase::Submitted,
            },
            Event::AnalysisFinished(result),
        ) => match result.and_then(validate) {
            Ok(report) => (
                Complete {
                    session,
                    remaining_secs,
                    report,
                },
                Vec::new(),
            ),
            Err(reason) => (
                Idle,
                vec![Effect::Notify(Notice::AnalysisFailed { reason })],
            ),
        },

        (
            Complete {
                session,
                remaining_secs,
                report,
            },
            Event::Export,
        ) => {
            let artifact = export::build_artifact(
                &session.started_at,
                &session.teacher_name,
                &session.student_name,
                &report,
            );
            (
                Complete {
                    session,
                    remaining_secs,
                    report,
                },
                vec![Effect::WriteExport(artifact)],
            )
        }

        (state, event) => {
            tracing::debug!(state = state.name(), event = event.name(), "ignoring event");
            (state, Vec::new())
        }
    }
}

/// Formats a countdown as `MM:SS`.
pub fn format_countdown(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
