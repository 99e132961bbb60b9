//! CV lifecycle
//!
//! Creation (manual or by upload), content updates through the version
//! service, and the soft status changes. Uploads land in blob storage under
//! `uploads/<user_id>/<cv_id>/<file_name>` before the CV row points at them.

use tracing::info;

use crate::domain::{ChangeType, Cv, CvContent, CvStatus, CvVersion, FileRef};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::humanize::ByteSize;
use crate::storage::{BlobStore, UploadOptions};
use crate::store::CoreStore;
use crate::versions::{NewVersionOptions, VersionService};

#[derive(Clone)]
pub struct CvService {
    store: CoreStore,
    blobs: BlobStore,
    versions: VersionService,
    max_upload: ByteSize,
}

impl CvService {
    pub fn new(
        store: CoreStore,
        blobs: BlobStore,
        versions: VersionService,
        max_upload: ByteSize,
    ) -> Self {
        Self {
            store,
            blobs,
            versions,
            max_upload,
        }
    }

    /// Manual creation, optionally with initial content (which becomes the
    /// first active version).
    pub fn create(
        &self,
        user_id: &str,
        title: &str,
        content: Option<CvContent>,
    ) -> CoreResult<Cv> {
        super::check_user_can_start(&self.store, user_id, None)?;
        if title.trim().is_empty() {
            return Err(CoreError::validation("title must not be empty"));
        }

        let cv = Cv::new(user_id, title);
        self.store.put_cv(&cv)?;

        if let Some(content) = content.filter(|c| !c.is_empty()) {
            self.versions.create_version(
                &cv.id,
                content,
                ChangeType::Manual,
                NewVersionOptions {
                    activate: true,
                    ..Default::default()
                },
            )?;
        }

        info!(cv_id = %cv.id, user_id, "CV created");
        self.get(user_id, &cv.id)
    }

    /// Creation by upload: store the original document, then the CV row with
    /// a `file_ref` and `parsing_status = pending`.
    pub async fn create_from_upload(
        &self,
        user_id: &str,
        title: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> CoreResult<Cv> {
        super::check_user_can_start(&self.store, user_id, None)?;
        if bytes.len() as u64 > self.max_upload.as_u64() {
            return Err(CoreError::new(
                ErrorCode::FileInvalid,
                format!("upload exceeds the {} limit", self.max_upload),
            ));
        }

        let cv = Cv::new(user_id, title);
        let key = format!("uploads/{}/{}/{}", user_id, cv.id, file_name);
        let uploaded = self
            .blobs
            .upload(
                bytes,
                &key,
                &UploadOptions {
                    content_type: Some(mime_type.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let cv = cv.with_file(FileRef {
            key,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            size: uploaded.size,
        });
        self.store.put_cv(&cv)?;

        info!(cv_id = %cv.id, user_id, file_name, "CV created from upload");
        Ok(cv)
    }

    pub fn get(&self, user_id: &str, cv_id: &str) -> CoreResult<Cv> {
        let cv = self
            .store
            .get_cv(cv_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        if !cv.is_owned_by(user_id) {
            return Err(CoreError::new(ErrorCode::CvNotFound, "cv not found"));
        }
        Ok(cv)
    }

    pub fn list(&self, user_id: &str) -> CoreResult<Vec<Cv>> {
        Ok(self.store.list_cvs_by_user(user_id)?)
    }

    /// Explicit content edit: a new manual version, activated.
    pub fn update_content(
        &self,
        user_id: &str,
        cv_id: &str,
        content: CvContent,
    ) -> CoreResult<CvVersion> {
        self.get(user_id, cv_id)?;
        self.versions.create_version(
            cv_id,
            content,
            ChangeType::Manual,
            NewVersionOptions {
                activate: true,
                ..Default::default()
            },
        )
    }

    pub fn set_status(&self, user_id: &str, cv_id: &str, status: CvStatus) -> CoreResult<Cv> {
        self.get(user_id, cv_id)?;
        Ok(self.store.update_cv_with(cv_id, |cv| cv.status = status)?)
    }

    pub fn list_versions(&self, user_id: &str, cv_id: &str) -> CoreResult<Vec<CvVersion>> {
        self.get(user_id, cv_id)?;
        self.versions.list_versions(cv_id)
    }

    /// Activation is the only way to change `Cv.content` after creation.
    pub fn activate_version(
        &self,
        user_id: &str,
        cv_id: &str,
        version_id: &str,
    ) -> CoreResult<CvVersion> {
        self.get(user_id, cv_id)?;
        self.versions.activate(cv_id, version_id, user_id)
    }

    pub fn delete_version(&self, user_id: &str, cv_id: &str, version_id: &str) -> CoreResult<()> {
        self.get(user_id, cv_id)?;
        self.versions.delete_version(cv_id, version_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::PersonalInfo;
    use tempfile::TempDir;

    fn setup() -> (CvService, CoreStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CoreStore::open(temp_dir.path().join("docs")).unwrap();
        let versions = VersionService::new(store.clone());
        let service = CvService::new(
            store.clone(),
            BlobStore::in_memory(),
            versions,
            ByteSize(20 * 1024 * 1024),
        );
        (service, store, temp_dir)
    }

    fn named_content(name: &str) -> CvContent {
        CvContent {
            personal: PersonalInfo {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_create_with_content_activates_first_version() {
        let (service, _store, _temp) = setup();
        let cv = service
            .create("user-1", "My CV", Some(named_content("Ada")))
            .unwrap();

        assert!(cv.active_version_id.is_some());
        assert_eq!(cv.content.personal.name.as_deref(), Some("Ada"));

        let versions = service.list_versions("user-1", &cv.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_active);
    }

    #[test]
    fn test_empty_title_rejected() {
        let (service, _store, _temp) = setup();
        let err = service.create("user-1", "  ", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_upload_sets_file_ref_and_pending() {
        let (service, _store, _temp) = setup();
        let cv = service
            .create_from_upload(
                "user-1",
                "Uploaded",
                "cv.pdf",
                "application/pdf",
                b"%PDF-1.4 fake".to_vec(),
            )
            .await
            .unwrap();

        let file_ref = cv.file_ref.unwrap();
        assert!(file_ref.key.starts_with("uploads/user-1/"));
        assert_eq!(cv.parsing_status, crate::domain::ParsingStatus::Pending);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let (service, _store, _temp) = setup();
        let err = service
            .create_from_upload(
                "user-1",
                "Huge",
                "cv.pdf",
                "application/pdf",
                vec![0u8; 21 * 1024 * 1024],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FileInvalid);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (service, _store, _temp) = setup();
        let err = service
            .create_from_upload("user-1", "Empty", "cv.pdf", "application/pdf", Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FileInvalid);
    }

    #[test]
    fn test_foreign_cv_looks_missing() {
        let (service, _store, _temp) = setup();
        let cv = service.create("user-1", "Mine", None).unwrap();

        let err = service.get("user-2", &cv.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::CvNotFound);
    }

    #[test]
    fn test_update_content_creates_manual_version() {
        let (service, _store, _temp) = setup();
        let cv = service
            .create("user-1", "My CV", Some(named_content("Ada")))
            .unwrap();

        let version = service
            .update_content("user-1", &cv.id, named_content("Ada Lovelace"))
            .unwrap();
        assert_eq!(version.version_number, 2);
        assert_eq!(version.change_type, ChangeType::Manual);

        let cv = service.get("user-1", &cv.id).unwrap();
        assert_eq!(cv.content.personal.name.as_deref(), Some("Ada Lovelace"));
    }
}
