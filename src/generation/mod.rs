//! Poster generation pipeline
//!
//! Authenticate, throttle, validate, check entitlement, synthesize, store
//! the image, record the poster as pending, then settle the debit and the
//! poster status in one transaction. Nothing that runs before the image is
//! stored touches persistent state, and anything written after that is
//! undone if settlement does not go through.

mod recovery;
mod types;


pub use recovery::{reconcile_pending, ReconcileReport};
pub use types::{
    GenerationRequest, GenerationResult, Poster, PosterSpec, PosterStatus, SizePreset,
    DEFAULT_STYLE,
};

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::{Identity, TokenVerifier};
use crate::billing::{credits_remaining, evaluate, Decision, EntitlementRecord, Operation};
use crate::error::{Error, Result};
use crate::object_store::{poster_key, ObjectStore};
use crate::rate_limit::RateLimiter;
use crate::store::{Database, PendingInsert, Settlement};
use crate::synthesis::{build_prompt, placeholder_url, stored_prompt, ImageSynthesizer, PLACEHOLDER_MODEL};

const MAX_REQUEST_ID_LEN: usize = 128;

/// Image location produced by the synthesis and storage steps
struct StoredImage {
    url: String,
    storage_path: Option<String>,
    model: String,
}

pub struct Generator {
    db: Arc<Database>,
    verifier: Arc<dyn TokenVerifier>,
    /// `None` runs in placeholder mode
    synthesizer: Option<Arc<dyn ImageSynthesizer>>,
    objects: Arc<dyn ObjectStore>,
    limiter: Arc<RateLimiter>,
}

impl Generator {
    pub fn new(
        db: Arc<Database>,
        verifier: Arc<dyn TokenVerifier>,
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        objects: Arc<dyn ObjectStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        if synthesizer.is_none() {
            warn!("No image model configured, posters will use placeholder images");
        }
        Self {
            db,
            verifier,
            synthesizer,
            objects,
            limiter,
        }
    }

    /// Run one generation for the holder of `token`.
    ///
    /// With a `request_id`, repeating the call returns the poster produced by
    /// the first one and charges nothing further.
    pub async fn generate(
        &self,
        token: &str,
        request: &GenerationRequest,
        request_id: Option<&str>,
    ) -> Result<GenerationResult> {
        let identity = self.verifier.verify(token).await?;
        self.generate_for(&identity, request, request_id).await
    }

    /// [`Generator::generate`] for a caller whose token is already verified
    pub async fn generate_for(
        &self,
        identity: &Identity,
        request: &GenerationRequest,
        request_id: Option<&str>,
    ) -> Result<GenerationResult> {
        let user_id = identity.uid.as_str();

        self.limiter
            .check_and_record(user_id)
            .map_err(|retry_after| Error::RateLimited { retry_after })?;

        let spec = request.validate()?;
        let request_id = validate_request_id(request_id)?;

        let owner = user_id.to_string();
        let record = self
            .db
            .call(move |db| db.get_user(&owner))
            .await?
            .ok_or(Error::UserNotFound)?;

        if let Some(request_id) = request_id {
            let (owner, key) = (user_id.to_string(), request_id.to_string());
            let existing = self
                .db
                .call(move |db| db.find_poster_by_request(&owner, &key))
                .await?;
            if let Some(existing) = existing {
                return replay(&record, existing);
            }
        }

        if let Decision::Denied { reason } = evaluate(&record, Operation::GeneratePoster) {
            info!(user_id, plan = %record.plan, credits = record.credits, "Generation denied");
            return Err(Error::InsufficientCredits(reason));
        }

        let image = self.synthesize_and_store(user_id, &spec).await?;

        let now = Utc::now();
        let (width, height) = spec.size.dimensions();
        let poster = Poster {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            request_id: request_id.map(str::to_string),
            title: spec.title.clone(),
            event_type: spec.event_type.clone(),
            description: spec.description.clone(),
            prompt: stored_prompt(&spec),
            image_url: image.url,
            storage_path: image.storage_path,
            style: spec.style.clone(),
            size: spec.size,
            width,
            height,
            model: image.model,
            status: PosterStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let pending = poster.clone();
        match self
            .db
            .call(move |db| db.insert_pending_poster(&pending))
            .await
        {
            Ok(PendingInsert::Inserted) => {}
            Ok(PendingInsert::Existing(existing)) => {
                // A concurrent request with the same id got there first
                self.delete_object(&poster).await;
                return replay(&record, existing);
            }
            Err(e) => {
                self.delete_object(&poster).await;
                return Err(e.into());
            }
        }

        let (poster_id, owner) = (poster.id.clone(), user_id.to_string());
        match self
            .db
            .call(move |db| db.settle_generation(&poster_id, &owner))
            .await
        {
            Ok(Settlement::Completed { record, poster }) => {
                info!(
                    user_id,
                    poster_id = %poster.id,
                    model = %poster.model,
                    credits_remaining = %credits_remaining(&record),
                    "Poster generated"
                );
                Ok(GenerationResult {
                    success: true,
                    poster_id: poster.id,
                    image_url: poster.image_url,
                    credits_remaining: credits_remaining(&record),
                })
            }
            Ok(Settlement::Denied(reason)) => {
                self.compensate(&poster).await;
                Err(Error::InsufficientCredits(reason))
            }
            Ok(Settlement::UserMissing) => {
                self.compensate(&poster).await;
                Err(Error::UserNotFound)
            }
            Ok(Settlement::NotPending) => {
                error!(user_id, poster_id = %poster.id, "Pending poster disappeared before settlement");
                self.delete_object(&poster).await;
                Err(Error::Internal("poster record lost before settlement".to_string()))
            }
            Err(e) => {
                self.compensate(&poster).await;
                Err(e.into())
            }
        }
    }

    async fn synthesize_and_store(&self, user_id: &str, spec: &PosterSpec) -> Result<StoredImage> {
        let prompt = build_prompt(spec);

        let Some(synthesizer) = &self.synthesizer else {
            return Ok(StoredImage {
                url: placeholder_url(prompt.width, prompt.height, &spec.title),
                storage_path: None,
                model: PLACEHOLDER_MODEL.to_string(),
            });
        };

        debug!(user_id, event_type = %spec.event_type, "Synthesizing poster");
        let image = synthesizer.synthesize(&prompt).await.map_err(|e| {
            warn!(user_id, error = %e, "Image synthesis failed");
            Error::SynthesisFailed(e)
        })?;

        let key = poster_key(user_id);
        let url = self
            .objects
            .put(&key, &image.bytes, &image.content_type)
            .await
            .map_err(|e| {
                error!(user_id, key = %key, error = %e, "Failed to store poster image");
                Error::StorageFailed(e)
            })?;

        Ok(StoredImage {
            url,
            storage_path: Some(key),
            model: synthesizer.model().to_string(),
        })
    }

    /// Undo a pending poster that will not be settled
    async fn compensate(&self, poster: &Poster) {
        let poster_id = poster.id.clone();
        match self
            .db
            .call(move |db| db.discard_pending_poster(&poster_id))
            .await
        {
            Ok(_) => warn!(user_id = %poster.user_id, poster_id = %poster.id, "Discarded unsettled poster"),
            Err(e) => error!(poster_id = %poster.id, error = %e, "Failed to discard unsettled poster"),
        }
        self.delete_object(poster).await;
    }

    async fn delete_object(&self, poster: &Poster) {
        if let Some(key) = &poster.storage_path {
            if let Err(e) = self.objects.delete(key).await {
                error!(key = %key, error = %e, "Failed to delete orphaned object");
            }
        }
    }
}

fn validate_request_id(request_id: Option<&str>) -> Result<Option<&str>> {
    match request_id.map(str::trim) {
        None | Some("") => Ok(None),
        Some(id) if id.len() > MAX_REQUEST_ID_LEN => Err(Error::invalid(format!(
            "Idempotency key must be at most {} characters",
            MAX_REQUEST_ID_LEN
        ))),
        Some(id) => Ok(Some(id)),
    }
}

/// Answer a repeated request from the poster it already produced
fn replay(record: &EntitlementRecord, existing: Poster) -> Result<GenerationResult> {
    match existing.status {
        PosterStatus::Completed => {
            debug!(user_id = %record.user_id, poster_id = %existing.id, "Replaying completed generation");
            Ok(GenerationResult {
                success: true,
                poster_id: existing.id,
                image_url: existing.image_url,
                credits_remaining: credits_remaining(record),
            })
        }
        PosterStatus::Pending => Err(Error::RequestInProgress),
    }
}
