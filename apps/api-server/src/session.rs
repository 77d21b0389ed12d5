use ai::image::RgbImage;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};
use uuid::Uuid;

/// Prompts offered when an image has been captioned but no question was asked.
pub const FOLLOW_UP_QUESTIONS: [&str; 6] = [
    "What is happening in the image?",
    "Where could this scene be located?",
    "What is the main object in the image?",
    "What might be the mood of the scene?",
    "What is the environment like?",
    "Is this image taken indoors or outdoors?",
];

pub fn follow_up_questions() -> Vec<String> {
    FOLLOW_UP_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("no image uploaded yet")]
    NoImage,

    #[error("no answered question yet")]
    NoAnswer,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub id: Uuid,
    pub image: Arc<RgbImage>,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answered {
    pub question: String,
    pub answer: String,
}

#[derive(Debug)]
struct Session {
    last_seen: Instant,
    upload: Option<Upload>,
    question: String,
    answered: Option<Answered>,
}

impl Session {
    fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            upload: None,
            question: String::new(),
            answered: None,
        }
    }

    fn upload_matches(&self, upload_id: Uuid) -> bool {
        self.upload.as_ref().is_some_and(|u| u.id == upload_id)
    }
}

/// In-memory interaction state, one entry per browser session.
///
/// The lock is only held for map operations, never across model inference.
/// An upload is committed together with its caption, so a failed caption
/// leaves the session untouched. Answers carry the id of the upload and the
/// question they were computed for and are dropped when either changed
/// meanwhile.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.last_seen = Instant::now();
        f(session)
    }

    pub fn create(&self) -> (Uuid, DateTime<Utc>) {
        let id = Uuid::new_v4();
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Session::new());
        (id, Utc::now())
    }

    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the session image with an already captioned one.
    ///
    /// The selected question carries over to the new image. The previous
    /// answer is replaced by `answered`, which is only kept when it was
    /// computed for the question still selected. Returns the stored upload
    /// and answer.
    pub fn set_image(
        &self,
        id: Uuid,
        image: Arc<RgbImage>,
        caption: String,
        answered: Option<Answered>,
    ) -> Result<(Upload, Option<Answered>), SessionError> {
        self.with_session(id, |session| {
            let upload = Upload {
                id: Uuid::new_v4(),
                image,
                caption,
            };
            session.upload = Some(upload.clone());
            session.answered = answered.filter(|a| a.question == session.question);
            Ok((upload, session.answered.clone()))
        })
    }

    pub fn upload(&self, id: Uuid) -> Result<Upload, SessionError> {
        self.with_session(id, |session| session.upload.clone().ok_or(SessionError::NoImage))
    }

    /// Store the selected question, returns the image it is asked about.
    ///
    /// Any previous answer belongs to another question and is cleared.
    pub fn select_question(&self, id: Uuid, question: &str) -> Result<Upload, SessionError> {
        self.with_session(id, |session| {
            session.question = question.to_string();
            session.answered = None;
            session.upload.clone().ok_or(SessionError::NoImage)
        })
    }

    pub fn question(&self, id: Uuid) -> Result<String, SessionError> {
        self.with_session(id, |session| Ok(session.question.clone()))
    }

    /// Returns false when the image was replaced or another question was
    /// selected while answering.
    pub fn set_answer(
        &self,
        id: Uuid,
        upload_id: Uuid,
        answered: Answered,
    ) -> Result<bool, SessionError> {
        self.with_session(id, |session| {
            if !session.upload_matches(upload_id) || session.question != answered.question {
                return Ok(false);
            }
            session.answered = Some(answered);
            Ok(true)
        })
    }

    /// Everything the PDF report needs: the current image with its caption and
    /// the last answered question.
    pub fn report_inputs(&self, id: Uuid) -> Result<(Upload, Answered), SessionError> {
        self.with_session(id, |session| {
            let upload = session.upload.clone().ok_or(SessionError::NoImage)?;
            let answered = session.answered.clone().ok_or(SessionError::NoAnswer)?;
            Ok((upload, answered))
        })
    }

    /// Drop sessions untouched for longer than `ttl`, returns how many were dropped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.last_seen.elapsed() <= ttl);
        before - sessions.len()
    }
}
