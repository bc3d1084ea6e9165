//! Subject-aware tutor on top of a live session
//!
//! Picks the system instruction for the active subject, steers the model with
//! hidden messages (session start, subject switch) and validates uploads before
//! they reach the live channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LiveError, LiveResult};
use crate::session::{ConnectionState, LiveSession};

/// Delay between an uploaded image and the text asking about it
pub const UPLOAD_FOLLOW_UP_DELAY: Duration = Duration::from_millis(500);

const TEACHER_PERSONA: &str = "\
You are Jarvis, a friendly and energetic personal teacher talking to a student by voice.

How you teach:
1. Structure every explanation: a short hook, the core idea in simple words, a real-life example, \
then a quick recap with one practical tip.
2. For facts, news or scientific data, check the latest information with the Google Search tool \
and say that you are quoting verified sources.
3. Speak natural Hinglish (a mix of English and Hindi). Be warm and encouraging, never dull.
4. Do not talk for too long at once. After a difficult part, ask whether it is clear before moving on.

For maths and logic, explain the method before the formula and solve problems one numbered step at a time.
Use bullet points for lists and bold the important terms.";

/// Teaching modes offered to the learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    #[default]
    Universal,
    Math,
    Science,
    History,
    Coding,
}

/// Public description of a subject
#[derive(Debug, Clone, Serialize)]
pub struct SubjectInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::Universal,
        Subject::Math,
        Subject::Science,
        Subject::History,
        Subject::Coding,
    ];

    /// Look up a subject by id (case-insensitive)
    pub fn parse(id: &str) -> Option<Subject> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|subject| subject.id().eq_ignore_ascii_case(id))
    }

    pub fn id(self) -> &'static str {
        match self {
            Subject::Universal => "universal",
            Subject::Math => "math",
            Subject::Science => "science",
            Subject::History => "history",
            Subject::Coding => "coding",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Subject::Universal => "Universal",
            Subject::Math => "Math",
            Subject::Science => "Science",
            Subject::History => "History",
            Subject::Coding => "Coding",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Subject::Universal => "General Tutor & News",
            Subject::Math => "Step-by-Step Solving",
            Subject::Science => "Biology & Physics",
            Subject::History => "Storytelling",
            Subject::Coding => "Logic & Code",
        }
    }

    pub fn info(self) -> SubjectInfo {
        SubjectInfo {
            id: self.id(),
            name: self.name(),
            description: self.description(),
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Subject::Universal => "\
Mode: universal teacher.
- Teach any subject the student brings up.
- For live news, sports scores or recent events, use Google Search.
- Turn search results into short spoken bullet updates.",
            Subject::Math => "\
Mode: maths coach.
- The goal is the method, not just the answer.
- Break hard problems into small steps.
- Use analogies for abstract ideas, e.g. a function is a machine with inputs and outputs.
- Correct mistakes gently and explain what went wrong.",
            Subject::Science => "\
Mode: science explorer.
- Go from phenomenon to principle to application.
- Explain the science behind everyday things.
- Describe diagrams in words when they help.",
            Subject::History => "\
Mode: history storyteller.
- Tell history as a story, not a list of dates.
- Follow cause, event, then consequence.
- Link past events to today's world where it fits.",
            Subject::Coding => "\
Mode: coding mentor.
- Explain the logic before showing code.
- Start from pseudocode or plain words.
- When debugging, lead the student to the bug with questions.",
        }
    }

    /// Full system instruction for this subject
    pub fn instruction(self) -> String {
        format!("{}\n\n{}", TEACHER_PERSONA, self.guidance())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hidden message that makes the tutor speak first
pub fn session_start_message(subject: Subject) -> String {
    format!(
        "[SYSTEM: A new session has started and you are the {} teacher. Greet the student \
         in Hinglish right away, briefly introduce yourself and ask what they would like to \
         learn today. Keep it short.]",
        subject.name()
    )
}

/// Hidden message sent when the learner changes subject mid-session
pub fn subject_switch_message(subject: Subject) -> String {
    format!(
        "[SYSTEM: The student switched to {0} mode. Take on the {0} teacher persona now and \
         focus on {0} topics.]",
        subject.name()
    )
}

/// Follow-up text sent after an uploaded image
pub fn upload_prompt(file_name: &str) -> String {
    format!(
        "I have uploaded an image: {}. Please analyze it and explain what you see.",
        file_name
    )
}

/// Only images can travel on the live channel
pub fn validate_upload(mime_type: &str) -> LiveResult<()> {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    if mime_type == "application/pdf" {
        return Err(LiveError::InvalidMedia(
            "PDF upload is not supported in a live conversation; convert the page to an image (JPG/PNG)"
                .to_string(),
        ));
    }
    if !mime_type.starts_with("image/") {
        return Err(LiveError::InvalidMedia(format!(
            "{} is not an image; upload a JPG or PNG",
            mime_type
        )));
    }
    Ok(())
}

/// A live session driven as a subject tutor
pub struct TutorSession {
    session: Arc<LiveSession>,
    subject: Mutex<Subject>,
    pending: Mutex<Option<String>>,
}

impl TutorSession {
    pub fn new(session: Arc<LiveSession>, subject: Subject) -> Self {
        session.set_system_instruction(subject.instruction());
        Self {
            session,
            subject: Mutex::new(subject),
            pending: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<LiveSession> {
        &self.session
    }

    pub fn subject(&self) -> Subject {
        *self.subject.lock()
    }

    /// Text waiting for the connection to come up
    pub fn pending_text(&self) -> Option<String> {
        self.pending.lock().clone()
    }

    /// Connect with the active subject and let the tutor open the conversation
    ///
    /// Text queued by `send_text` while disconnected is sent once the greeting
    /// request is out.
    pub async fn start(&self) -> LiveResult<()> {
        let subject = self.subject();
        self.session.set_system_instruction(subject.instruction());
        self.session.connect().await?;

        info!("Tutor session started ({})", subject);
        self.session.send_hidden_message(&session_start_message(subject));

        let pending = self.pending.lock().take();
        if let Some(text) = pending {
            debug!("Sending text queued before connect");
            self.session.send_text_message(&text);
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.session.disconnect();
    }

    /// Change subject; a connected tutor is told to switch persona
    pub fn switch_subject(&self, subject: Subject) {
        let previous = std::mem::replace(&mut *self.subject.lock(), subject);
        if previous == subject {
            return;
        }

        self.session.set_system_instruction(subject.instruction());
        info!("Subject switched: {} -> {}", previous, subject);

        if self.session.state() == ConnectionState::Connected {
            self.session.send_hidden_message(&subject_switch_message(subject));
        }
    }

    /// Send typed text, connecting first if needed
    ///
    /// Blank text is ignored. While a connection attempt is already running the
    /// text is queued and sent by that attempt.
    pub async fn send_text(&self, text: &str) -> LiveResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        match self.session.state() {
            ConnectionState::Connected => {
                self.session.send_text_message(text);
                Ok(())
            }
            ConnectionState::Connecting => {
                self.queue_text(text);
                Ok(())
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                *self.pending.lock() = Some(text.to_string());
                self.start().await
            }
        }
    }

    /// Hold text for the running connection attempt
    ///
    /// If that attempt already finished and flushed its queue, the text is
    /// sent here instead. Whoever takes it from the queue sends it.
    pub fn queue_text(&self, text: &str) {
        *self.pending.lock() = Some(text.to_string());

        if self.session.state() == ConnectionState::Connected {
            let pending = self.pending.lock().take();
            if let Some(text) = pending {
                debug!("Connection came up while queueing; sending now");
                self.session.send_text_message(&text);
            }
        }
    }

    /// Share an image with the tutor and ask about it
    pub async fn upload(&self, file_name: &str, mime_type: &str, bytes: &[u8]) -> LiveResult<()> {
        validate_upload(mime_type)?;

        let state = self.session.state();
        if state != ConnectionState::Connected {
            return Err(LiveError::InvalidTransition {
                action: "upload",
                from: state,
            });
        }
        if bytes.is_empty() {
            return Err(LiveError::InvalidMedia(format!("{} is empty", file_name)));
        }

        info!("Uploading {} ({}, {} bytes)", file_name, mime_type, bytes.len());
        self.session.send_realtime_input(&STANDARD.encode(bytes), mime_type);

        // Give the service time to take in the image before the question arrives
        tokio::time::sleep(UPLOAD_FOLLOW_UP_DELAY).await;
        self.session.send_text_message(&upload_prompt(file_name));
        Ok(())
    }
}
