//! Version & content service
//!
//! The only writer allowed to change `Cv.content` after creation. Version
//! creation and activation run as write-batch transactions under the store's
//! write lock, so `Cv.active_version_id` always has a single well-defined
//! value even with parallel optimization jobs in flight.

pub mod hash;

pub use hash::{content_hash, is_content_equal};

use tracing::{debug, info};

use crate::domain::{ChangeType, Cv, CvContent, CvVersion, ParsingStatus};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::store::CoreStore;

/// Options for [`VersionService::create_version`].
#[derive(Debug, Clone, Default)]
pub struct NewVersionOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ai_confidence: Option<f64>,
    /// Atomically make this the active version and sync `Cv.content`.
    pub activate: bool,
}

#[derive(Clone)]
pub struct VersionService {
    store: CoreStore,
}

impl VersionService {
    pub fn new(store: CoreStore) -> Self {
        Self { store }
    }

    /// Create the next version of a CV inside a transaction: compute
    /// `version_number = max(existing) + 1`, insert the row, and optionally
    /// flip activation in the same batch.
    pub fn create_version(
        &self,
        cv_id: &str,
        content: CvContent,
        change_type: ChangeType,
        opts: NewVersionOptions,
    ) -> CoreResult<CvVersion> {
        let created = self.store.with_write_lock(|store| {
            let cv = store
                .get_cv(cv_id)?
                .ok_or_else(|| crate::store::StoreError::NotFound {
                    collection: "cvs",
                    id: cv_id.to_string(),
                })?;

            let new_hash = hash::content_hash(&content);

            // A non-manual change must actually change the content
            if change_type != ChangeType::Manual {
                if let Some(previous) = self.active_version_of(store, &cv)? {
                    if previous.content_hash == new_hash {
                        return Ok(Err(CoreError::new(
                            ErrorCode::VersionConflict,
                            "content hash matches the active version",
                        )));
                    }
                }
            }

            let number = store.max_version_number(cv_id)? + 1;
            let mut version = CvVersion::new(cv_id, &cv.user_id, number, content, change_type);
            version.name = opts.name.clone();
            version.description = opts.description.clone();
            version.content_hash = new_hash;
            version.metadata.ai_confidence = opts.ai_confidence;
            version.is_active = opts.activate;

            let mut batch = store.batch();
            store.stage_version(&mut batch, &version)?;

            if opts.activate {
                let mut cv = cv;
                if let Some(mut previous) = self.active_version_of(store, &cv)? {
                    previous.is_active = false;
                    store.stage_version(&mut batch, &previous)?;
                }
                cv.content = version.content.clone();
                cv.active_version_id = Some(version.id.clone());
                cv.updated_at = chrono::Utc::now();
                cv.revision += 1;
                store.stage_cv(&mut batch, &cv)?;
            }

            batch.commit().map_err(crate::store::StoreError::from)?;
            Ok(Ok(version))
        })??;

        info!(
            cv_id,
            version_number = created.version_number,
            change_type = ?created.change_type,
            active = created.is_active,
            "Created CV version"
        );
        Ok(created)
    }

    /// Make an existing version the active one. The three writes (old
    /// version off, new version on, CV content + pointer) commit together.
    pub fn activate(&self, cv_id: &str, version_id: &str, user_id: &str) -> CoreResult<CvVersion> {
        let activated = self.store.with_write_lock(|store| {
            let cv = store
                .get_cv(cv_id)?
                .ok_or_else(|| crate::store::StoreError::NotFound {
                    collection: "cvs",
                    id: cv_id.to_string(),
                })?;

            let Some(mut version) = store.get_version_by_id(version_id)? else {
                return Ok(Err(CoreError::new(ErrorCode::VersionNotFound, "version not found")));
            };
            if version.cv_id != cv_id || !cv.is_owned_by(user_id) {
                // Uniform shape so callers cannot probe other users' resources
                return Ok(Err(CoreError::new(ErrorCode::VersionNotFound, "version not found")));
            }
            if version.is_active {
                return Ok(Err(CoreError::new(
                    ErrorCode::VersionActive,
                    "version is already active",
                )));
            }

            let mut batch = store.batch();

            if let Some(mut previous) = self.active_version_of(store, &cv)? {
                previous.is_active = false;
                store.stage_version(&mut batch, &previous)?;
            }

            version.is_active = true;
            store.stage_version(&mut batch, &version)?;

            let mut cv = cv;
            cv.content = version.content.clone();
            cv.active_version_id = Some(version.id.clone());
            cv.updated_at = chrono::Utc::now();
            cv.revision += 1;
            store.stage_cv(&mut batch, &cv)?;

            batch.commit().map_err(crate::store::StoreError::from)?;
            Ok(Ok(version))
        })??;

        info!(cv_id, version_id, "Activated CV version");
        Ok(activated)
    }

    /// Delete an inactive version.
    pub fn delete_version(&self, cv_id: &str, version_id: &str, user_id: &str) -> CoreResult<()> {
        self.store.with_write_lock(|store| {
            let Some(version) = store.get_version_by_id(version_id)? else {
                return Ok(Err(CoreError::new(ErrorCode::VersionNotFound, "version not found")));
            };
            if version.cv_id != cv_id || version.user_id != user_id {
                return Ok(Err(CoreError::new(ErrorCode::VersionNotFound, "version not found")));
            }
            if version.is_active {
                return Ok(Err(CoreError::new(
                    ErrorCode::VersionActive,
                    "active version cannot be deleted",
                )));
            }
            store.delete_version(&version)?;
            debug!(cv_id, version_id, "Deleted CV version");
            Ok(Ok(()))
        })?
    }

    /// Record a parse result: a new active `parsing` version, or only the
    /// status flip when the parsed content hash matches the current active
    /// version.
    pub fn record_parse_result(
        &self,
        cv_id: &str,
        content: CvContent,
        confidence: f64,
    ) -> CoreResult<Option<CvVersion>> {
        let unchanged = {
            let cv = self
                .store
                .get_cv(cv_id)?
                .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
            cv.active_version_id.is_some() && hash::is_content_equal(&cv.content, &content)
        };

        let version = if unchanged {
            None
        } else {
            Some(self.create_version(
                cv_id,
                content,
                ChangeType::Parsing,
                NewVersionOptions {
                    ai_confidence: Some(confidence),
                    activate: true,
                    ..Default::default()
                },
            )?)
        };

        self.store.update_cv_with(cv_id, |cv| {
            cv.parsing_status = ParsingStatus::Parsed;
        })?;

        Ok(version)
    }

    pub fn list_versions(&self, cv_id: &str) -> CoreResult<Vec<CvVersion>> {
        Ok(self.store.list_versions(cv_id)?)
    }

    fn active_version_of(&self, store: &CoreStore, cv: &Cv) -> crate::store::Result<Option<CvVersion>> {
        match &cv.active_version_id {
            Some(id) => store.get_version_by_id(id),
            None => Ok(None),
        }
    }
}
