//! Readiness gate for the segmenter.
//!
//! The dictionary is loaded on a blocking task; consumers wait on the gate
//! instead of polling a flag, so segmentation can never start early.

use std::sync::Arc;
use tokio::sync::watch;

use crate::dictionary::{Dictionary, DictionarySource};
use crate::error::DictionaryError;
use crate::segmenter::Segmenter;

type Readiness = Option<Result<Arc<Segmenter>, Arc<DictionaryError>>>;

#[derive(Clone)]
pub struct SegmenterGate {
    rx: watch::Receiver<Readiness>,
}

impl SegmenterGate {
    /// Start loading `sources` on the blocking pool. Must be called inside a tokio runtime.
    pub fn spawn(sources: Vec<DictionarySource>) -> Self {
        let (tx, rx) = watch::channel(None);
        tokio::task::spawn_blocking(move || {
            let result = Dictionary::load_sources(&sources)
                .map(|d| Arc::new(Segmenter::new(Arc::new(d))))
                .map_err(Arc::new);
            if let Err(e) = &result {
                tracing::error!(error = %e, "dictionary load failed");
            }
            let _ = tx.send(Some(result));
        });
        Self { rx }
    }

    /// A gate that is open from the start.
    pub fn ready_with(segmenter: Arc<Segmenter>) -> Self {
        let (_tx, rx) = watch::channel(Some(Ok(segmenter)));
        Self { rx }
    }

    /// The segmenter if loading already finished successfully.
    pub fn try_get(&self) -> Option<Arc<Segmenter>> {
        match &*self.rx.borrow() {
            Some(Ok(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Wait for loading to finish.
    pub async fn ready(&self) -> Result<Arc<Segmenter>, Arc<DictionaryError>> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Arc::new(DictionaryError::Interrupted))?;
        match &*state {
            Some(Ok(s)) => Ok(s.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Arc::new(DictionaryError::Interrupted)),
        }
    }
}
