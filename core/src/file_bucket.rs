//! File storage under `/files/{bucket}/{name}`.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::engine::{HttpEngine, UreqEngine};
use crate::error::ErrorCode;
use crate::http::{HttpResponse, HEADER_CONTENT_TYPE, HEADER_X_ACL, HEADER_X_CONTENT_LENGTH};
use crate::result::BaasResult;
use crate::service::Service;
use crate::user::parse_timestamp;

const FILES_PATH: &str = "/files";

const PARAM_META_ETAG: &str = "metaETag";
const PARAM_FILE_ETAG: &str = "fileETag";
const PARAM_CACHE_DISABLED: &str = "cacheDisabled";
const PARAM_PUBLISHED: &str = "published";
const PARAM_DELETE_MARK: &str = "deleteMark";
const KEY_RESULTS: &str = "results";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(skip)]
    pub bucket: String,
    pub filename: String,
    pub content_type: String,
    pub length: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(rename = "metaETag")]
    pub meta_etag: String,
    #[serde(rename = "fileETag")]
    pub file_etag: String,
    pub cache_disabled: bool,
    pub public_url: String,
    /// Raw ACL object.
    #[serde(rename = "ACL")]
    pub acl: Option<Value>,
}

impl FileMetadata {
    fn from_json(bucket: &str, json: Map<String, Value>) -> Self {
        let mut metadata: Self = serde_json::from_value(Value::Object(json))
            .inspect_err(|err| tracing::warn!(error = %err, "malformed file metadata"))
            .unwrap_or_default();
        metadata.bucket = bucket.to_string();
        metadata
    }

    pub fn created_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.created_at)
    }

    pub fn updated_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.updated_at)
    }
}

pub struct FileBucket<E = UreqEngine> {
    service: Arc<Service<E>>,
    bucket: String,
    timeout: i32,
}

impl<E: HttpEngine> FileBucket<E> {
    pub fn new(service: Arc<Service<E>>, bucket: impl Into<String>) -> Self {
        let timeout = service.default_timeout();
        Self {
            service,
            bucket: bucket.into(),
            timeout,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: i32) {
        self.timeout = timeout;
    }

    fn check_bucket(&self) -> Result<(), ErrorCode> {
        if self.bucket.is_empty() {
            tracing::error!("bucket name is empty");
            return Err(ErrorCode::BucketName);
        }
        Ok(())
    }

    fn file_path(&self, name: &str) -> String {
        format!("/{}/{}", self.bucket, urlencoding::encode(name))
    }

    fn to_metadata(&self, response: &HttpResponse) -> FileMetadata {
        FileMetadata::from_json(&self.bucket, response.json_object())
    }

    /// Download `name` into `path`; succeeds with the size declared by the
    /// server, which has already been checked against the bytes written.
    pub fn download_file(&self, name: &str, path: &Path) -> BaasResult<u64> {
        if name.is_empty() || path.as_os_str().is_empty() {
            tracing::error!("file name or local path is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_file_download(
                |factory| factory.get(FILES_PATH).append_path(&self.file_path(name)).build(),
                path,
                self.timeout,
            )
            .map(|response| {
                response
                    .header(HEADER_X_CONTENT_LENGTH)
                    .and_then(|length| length.trim().parse().ok())
                    .unwrap_or(0)
            })
    }

    /// Upload a new file. `acl` is raw ACL JSON sent as `X-ACL`; pass `""`
    /// for the bucket default.
    pub fn upload_new_file(
        &self,
        name: &str,
        path: &Path,
        content_type: &str,
        acl: &str,
        cache_disable: bool,
    ) -> BaasResult<FileMetadata> {
        if name.is_empty() || path.as_os_str().is_empty() || content_type.is_empty() {
            tracing::error!("file name, local path or content type is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_file_upload(
                |factory| {
                    let factory = factory
                        .post(FILES_PATH)
                        .append_path(&self.file_path(name))
                        .append_header(HEADER_CONTENT_TYPE, content_type)
                        .append_header(HEADER_X_ACL, acl);
                    let factory = if cache_disable {
                        factory.append_param(PARAM_CACHE_DISABLED, "true")
                    } else {
                        factory
                    };
                    factory.build()
                },
                path,
                self.timeout,
            )
            .map(|response| self.to_metadata(&response))
    }

    /// Replace the contents of an existing file. Empty etags and content
    /// type are left out of the request.
    pub fn upload_update_file(
        &self,
        name: &str,
        path: &Path,
        content_type: &str,
        meta_etag: &str,
        file_etag: &str,
    ) -> BaasResult<FileMetadata> {
        if name.is_empty() || path.as_os_str().is_empty() {
            tracing::error!("file name or local path is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_file_upload(
                |factory| {
                    factory
                        .put(FILES_PATH)
                        .append_path(&self.file_path(name))
                        .append_header(HEADER_CONTENT_TYPE, content_type)
                        .append_param(PARAM_META_ETAG, meta_etag)
                        .append_param(PARAM_FILE_ETAG, file_etag)
                        .build()
                },
                path,
                self.timeout,
            )
            .map(|response| self.to_metadata(&response))
    }

    /// `upload_update_file` for a file described by earlier metadata: its
    /// name, content type and both etags.
    pub fn upload_update_file_with(&self, metadata: &FileMetadata, path: &Path) -> BaasResult<FileMetadata> {
        self.upload_update_file(
            &metadata.filename,
            path,
            &metadata.content_type,
            &metadata.meta_etag,
            &metadata.file_etag,
        )
    }

    /// Returns the response body: the deleted file's metadata, or for a
    /// soft delete the marked metadata.
    pub fn delete_file(
        &self,
        name: &str,
        meta_etag: &str,
        file_etag: &str,
        delete_mark: bool,
    ) -> BaasResult<Map<String, Value>> {
        if name.is_empty() {
            tracing::error!("file name is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_request(
                |factory| {
                    let factory = factory
                        .delete(FILES_PATH)
                        .append_path(&self.file_path(name))
                        .append_param(PARAM_META_ETAG, meta_etag)
                        .append_param(PARAM_FILE_ETAG, file_etag);
                    let factory = if delete_mark {
                        factory.append_param(PARAM_DELETE_MARK, "1")
                    } else {
                        factory
                    };
                    factory.build()
                },
                self.timeout,
            )
            .map(|response| response.json_object())
    }

    /// List files in the bucket. `published` restricts to public files,
    /// `delete_mark` includes soft-deleted ones.
    pub fn get_files(&self, published: bool, delete_mark: bool) -> BaasResult<Vec<FileMetadata>> {
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_request(
                |factory| {
                    let mut factory = factory.get(FILES_PATH).append_path(&format!("/{}", self.bucket));
                    if published {
                        factory = factory.append_param(PARAM_PUBLISHED, "1");
                    }
                    if delete_mark {
                        factory = factory.append_param(PARAM_DELETE_MARK, "1");
                    }
                    factory.build()
                },
                self.timeout,
            )
            .map(|response| match response.json_object().remove(KEY_RESULTS) {
                Some(Value::Array(results)) => results
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(FileMetadata::from_json(&self.bucket, map)),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ServiceConfig};
    use crate::http::HttpMethod;
    use crate::testing::{FakeEngine, Script};
    use serde_json::json;

    fn bucket(name: &str, script: Script) -> (FileBucket<FakeEngine>, FakeEngine) {
        let engine = FakeEngine::new(script);
        let shared = engine.clone();
        let config = ServiceConfig::new(Credentials::new("http://localhost", "tenant", "app", "key"));
        let service = Arc::new(Service::with_engine(config, move || shared.clone()));
        (FileBucket::new(service, name), engine)
    }

    fn metadata_json() -> Value {
        json!({
            "filename": "a b.txt",
            "contentType": "text/plain",
            "length": 5,
            "createdAt": "2017-03-07T08:49:58.000Z",
            "updatedAt": "2017-03-07T08:49:58.000Z",
            "metaETag": "m1",
            "fileETag": "f1",
            "cacheDisabled": true,
            "publicUrl": "",
            "ACL": {"r": ["g:anonymous"]},
        })
    }

    #[test]
    fn metadata_parses_server_fields() {
        let Value::Object(map) = metadata_json() else { unreachable!() };
        let metadata = FileMetadata::from_json("docs", map);
        assert_eq!(metadata.bucket, "docs");
        assert_eq!(metadata.filename, "a b.txt");
        assert_eq!(metadata.length, 5);
        assert_eq!(metadata.meta_etag, "m1");
        assert_eq!(metadata.file_etag, "f1");
        assert!(metadata.cache_disabled);
        assert!(metadata.created_time().is_some());
        assert_eq!(metadata.acl, Some(json!({"r": ["g:anonymous"]})));
    }

    #[test]
    fn download_escapes_name_and_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let (bucket, engine) = bucket("docs", Script::ok("").header("X-Content-Length", "5").body("hello"));

        assert_eq!(bucket.download_file("a b.txt", &path).success(), Some(&5));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(engine.last_request().unwrap().url, "http://localhost/1/tenant/files/docs/a%20b.txt");
    }

    #[test]
    fn download_validates_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (bucket, engine) = bucket("docs", Script::ok(""));
        assert_eq!(
            bucket.download_file("", &dir.path().join("x")).fatal_error(),
            Some(ErrorCode::InvalidArgument)
        );
        assert_eq!(bucket.download_file("a", Path::new("")).fatal_error(), Some(ErrorCode::InvalidArgument));
        let (unnamed, _) = self::bucket("", Script::ok(""));
        assert_eq!(unnamed.download_file("a", &dir.path().join("x")).fatal_error(), Some(ErrorCode::BucketName));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn upload_new_file_posts_with_acl_and_cache_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, b"hello").unwrap();
        let (bucket, engine) = bucket("docs", Script::status(201, "Created").body(metadata_json().to_string()));

        let metadata = bucket
            .upload_new_file("a b.txt", &path, "text/plain", r#"{"r":["g:anonymous"]}"#, true)
            .success()
            .cloned()
            .unwrap();
        assert_eq!(metadata.filename, "a b.txt");

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.url, "http://localhost/1/tenant/files/docs/a%20b.txt?cacheDisabled=true");
        assert_eq!(sent.header("Content-Type"), Some("text/plain"));
        assert_eq!(sent.header("X-ACL"), Some(r#"{"r":["g:anonymous"]}"#));
        assert_eq!(sent.header("Content-Length"), Some("5"));
        assert_eq!(engine.last_upload().unwrap(), b"hello");
    }

    #[test]
    fn upload_new_file_requires_content_type() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (bucket, engine) = bucket("docs", Script::ok("{}"));
        let result = bucket.upload_new_file("a", file.path(), "", "", false);
        assert_eq!(result.fatal_error(), Some(ErrorCode::InvalidArgument));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn upload_missing_file_is_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let (bucket, engine) = bucket("docs", Script::ok("{}"));
        let result = bucket.upload_new_file("a", &dir.path().join("missing"), "text/plain", "", false);
        assert_eq!(result.fatal_error(), Some(ErrorCode::OpenFile));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn upload_update_file_puts_with_etags() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"new").unwrap();
        let (bucket, engine) = bucket("docs", Script::ok(&metadata_json().to_string()));

        assert!(bucket.upload_update_file("a.txt", file.path(), "", "m1", "f1").is_success());
        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Put);
        assert_eq!(sent.url, "http://localhost/1/tenant/files/docs/a.txt?metaETag=m1&fileETag=f1");
        assert_eq!(sent.header("Content-Type"), None);
    }

    #[test]
    fn upload_update_file_with_uses_metadata_fields() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"new").unwrap();
        let (bucket, engine) = bucket("docs", Script::ok(&metadata_json().to_string()));
        let Value::Object(map) = metadata_json() else { unreachable!() };
        let metadata = FileMetadata::from_json("docs", map);

        let updated = bucket.upload_update_file_with(&metadata, file.path()).success().cloned().unwrap();
        assert_eq!(updated.filename, "a b.txt");

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Put);
        assert_eq!(sent.url, "http://localhost/1/tenant/files/docs/a%20b.txt?metaETag=m1&fileETag=f1");
        assert_eq!(sent.header("Content-Type"), Some("text/plain"));
        assert_eq!(engine.last_upload().unwrap(), b"new");
    }

    #[test]
    fn delete_file_with_mark() {
        let (bucket, engine) = bucket("docs", Script::ok(r#"{"filename":"a.txt","_deleted":true}"#));
        let body = bucket.delete_file("a.txt", "m1", "", true).success().cloned().unwrap();
        assert_eq!(body.get("_deleted"), Some(&Value::Bool(true)));

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Delete);
        assert_eq!(sent.url, "http://localhost/1/tenant/files/docs/a.txt?metaETag=m1&deleteMark=1");
    }

    #[test]
    fn get_files_lists_metadata() {
        let body = json!({"results": [metadata_json(), metadata_json()]}).to_string();
        let (bucket, engine) = bucket("docs", Script::ok(&body));

        let files = bucket.get_files(true, true).success().cloned().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.bucket == "docs"));
        assert_eq!(
            engine.last_request().unwrap().url,
            "http://localhost/1/tenant/files/docs?published=1&deleteMark=1"
        );
    }

    #[test]
    fn get_files_requires_bucket() {
        let (bucket, engine) = bucket("", Script::ok("{}"));
        assert_eq!(bucket.get_files(false, false).fatal_error(), Some(ErrorCode::BucketName));
        assert_eq!(engine.calls(), 0);
    }
}
