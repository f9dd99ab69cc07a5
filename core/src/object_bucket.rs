//! JSON object storage under `/objects/{bucket}`.
//!
//! Query construction lives with the caller: `query` takes the finished
//! parameter list (`where`, `order`, `limit`, ...) and only adds `count`.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::engine::{HttpEngine, UreqEngine};
use crate::error::ErrorCode;
use crate::http::{HttpResponse, CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE};
use crate::result::BaasResult;
use crate::service::Service;
use crate::user::parse_timestamp;

const OBJECTS_PATH: &str = "/objects";

const KEY_ID: &str = "_id";
const KEY_CREATED_AT: &str = "createdAt";
const KEY_UPDATED_AT: &str = "updatedAt";
const KEY_ACL: &str = "ACL";
const KEY_ETAG: &str = "etag";
const KEY_DELETED: &str = "_deleted";
const KEY_RESULTS: &str = "results";
const KEY_COUNT: &str = "count";
const KEY_FULL_UPDATE: &str = "$full_update";
const PARAM_DELETE_MARK: &str = "deleteMark";

/// Server-managed fields, never sent back as user data.
const RESERVED_KEYS: [&str; 6] = [KEY_ID, KEY_CREATED_AT, KEY_UPDATED_AT, KEY_ACL, KEY_ETAG, KEY_DELETED];

/// One stored object. Reserved fields are split out of `data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaasObject {
    pub bucket: String,
    /// Empty until the object has been saved.
    pub id: String,
    pub etag: String,
    pub created_at: String,
    pub updated_at: String,
    /// Raw ACL object, if the server returned one or the caller set one.
    pub acl: Option<Value>,
    /// Soft-delete mark.
    pub deleted: bool,
    pub data: Map<String, Value>,
}

impl BaasObject {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn from_json(bucket: impl Into<String>, mut json: Map<String, Value>) -> Self {
        let mut take_string = |key: &str| match json.remove(key) {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };
        let id = take_string(KEY_ID);
        let etag = take_string(KEY_ETAG);
        let created_at = take_string(KEY_CREATED_AT);
        let updated_at = take_string(KEY_UPDATED_AT);
        let acl = json.remove(KEY_ACL).filter(Value::is_object);
        let deleted = json.remove(KEY_DELETED).and_then(|v| v.as_bool()).unwrap_or(false);
        Self {
            bucket: bucket.into(),
            id,
            etag,
            created_at,
            updated_at,
            acl,
            deleted,
            data: json,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn created_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.created_at)
    }

    pub fn updated_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.updated_at)
    }

    /// User data with any reserved keys stripped.
    fn user_data(&self) -> Map<String, Value> {
        strip_reserved(self.data.clone())
    }
}

fn strip_reserved(mut data: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        data.remove(key);
    }
    data
}

/// Result page of `ObjectBucket::query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectQueryResult {
    pub objects: Vec<BaasObject>,
    /// Total match count, when requested.
    pub count: Option<i64>,
}

pub struct ObjectBucket<E = UreqEngine> {
    service: Arc<Service<E>>,
    bucket: String,
    timeout: i32,
}

impl<E: HttpEngine> ObjectBucket<E> {
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

    pub fn new_object(&self) -> BaasObject {
        BaasObject::new(self.bucket.as_str())
    }

    fn check_bucket(&self) -> Result<(), ErrorCode> {
        if self.bucket.is_empty() {
            tracing::error!("bucket name is empty");
            return Err(ErrorCode::BucketName);
        }
        Ok(())
    }

    fn to_object(&self, response: &HttpResponse) -> BaasObject {
        BaasObject::from_json(self.bucket.as_str(), response.json_object())
    }

    /// `delete_mark` also returns soft-deleted objects.
    pub fn get_object(&self, id: &str, delete_mark: bool) -> BaasResult<BaasObject> {
        if id.is_empty() {
            tracing::error!("object id is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        self.service
            .execute_request(
                |factory| {
                    let factory = factory
                        .get(OBJECTS_PATH)
                        .append_path(&format!("/{}/{id}", self.bucket));
                    let factory = if delete_mark {
                        factory.append_param(PARAM_DELETE_MARK, "1")
                    } else {
                        factory
                    };
                    factory.build()
                },
                self.timeout,
            )
            .map(|response| self.to_object(&response))
    }

    pub fn query<I, K, V>(&self, params: I, with_count: bool) -> BaasResult<ObjectQueryResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        let mut params: Vec<(String, String)> = params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if with_count {
            params.push((KEY_COUNT.to_string(), "1".to_string()));
        }

        self.service
            .execute_request(
                |factory| {
                    factory
                        .get(OBJECTS_PATH)
                        .append_path(&format!("/{}", self.bucket))
                        .params(params)
                        .build()
                },
                self.timeout,
            )
            .map(|response| {
                let mut json = response.json_object();
                let objects = match json.remove(KEY_RESULTS) {
                    Some(Value::Array(results)) => results
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(map) => Some(BaasObject::from_json(self.bucket.as_str(), map)),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let count = if with_count {
                    Some(json.get(KEY_COUNT).and_then(Value::as_i64).unwrap_or(0))
                } else {
                    None
                };
                ObjectQueryResult { objects, count }
            })
    }

    /// Create (`POST`) when `object.id` is empty, otherwise replace
    /// (`PUT` with `$full_update`, guarded by the etag when known). The ACL
    /// is sent for new objects only when `with_acl` is set.
    pub fn save(&self, object: &BaasObject, with_acl: bool) -> BaasResult<BaasObject> {
        if let Err(code) = self.check_bucket() {
            return code.into();
        }

        let mut body = object.user_data();
        let is_new = object.id.is_empty();
        if is_new {
            if let (true, Some(acl)) = (with_acl, &object.acl) {
                body.insert(KEY_ACL.to_string(), acl.clone());
            }
        } else {
            if let Some(acl) = &object.acl {
                body.insert(KEY_ACL.to_string(), acl.clone());
            }
            if !object.created_at.is_empty() {
                body.insert(KEY_CREATED_AT.to_string(), object.created_at.clone().into());
            }
            let mut full = Map::new();
            full.insert(KEY_FULL_UPDATE.to_string(), Value::Object(body));
            body = full;
        }
        let body = Value::Object(body).to_string();

        tracing::debug!(bucket = %self.bucket, id = %object.id, is_new, "saving object");
        self.service
            .execute_request(
                |factory| {
                    let factory = if is_new {
                        factory
                            .post(OBJECTS_PATH)
                            .append_path(&format!("/{}", self.bucket))
                    } else {
                        factory
                            .put(OBJECTS_PATH)
                            .append_path(&format!("/{}/{}", self.bucket, object.id))
                            .append_param(KEY_ETAG, object.etag.as_str())
                    };
                    factory
                        .append_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
                        .body(body)
                        .build()
                },
                self.timeout,
            )
            .map(|response| self.to_object(&response))
    }

    /// Partial update: only the keys in `data` change on the server.
    /// Reserved keys in `data` are ignored; `acl`, when given, replaces the
    /// stored ACL. The update is guarded by `etag` when it is non-empty.
    pub fn part_update_object(
        &self,
        id: &str,
        etag: &str,
        data: &Map<String, Value>,
        acl: Option<&Value>,
    ) -> BaasResult<BaasObject> {
        if data.is_empty() {
            tracing::error!("partial update data is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }
        if let Err(code) = self.check_bucket() {
            return code.into();
        }
        if id.is_empty() {
            tracing::error!("object id is empty");
            return BaasResult::FatalError(ErrorCode::ObjectId);
        }

        let mut body = strip_reserved(data.clone());
        if let Some(acl) = acl {
            body.insert(KEY_ACL.to_string(), acl.clone());
        }
        let body = Value::Object(body).to_string();

        tracing::debug!(bucket = %self.bucket, id, "partially updating object");
        self.service
            .execute_request(
                |factory| {
                    factory
                        .put(OBJECTS_PATH)
                        .append_path(&format!("/{}/{id}", self.bucket))
                        .append_param(KEY_ETAG, etag)
                        .append_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
                        .body(body)
                        .build()
                },
                self.timeout,
            )
            .map(|response| self.to_object(&response))
    }

    /// With `delete_mark` the object is only marked deleted and the marked
    /// object comes back; otherwise it is removed and the body is returned
    /// as plain data.
    pub fn delete_object(&self, id: &str, etag: &str, delete_mark: bool) -> BaasResult<BaasObject> {
        if let Err(code) = self.check_bucket() {
            return code.into();
        }
        if id.is_empty() {
            tracing::error!("object id is empty");
            return BaasResult::FatalError(ErrorCode::ObjectId);
        }

        self.service
            .execute_request(
                |factory| {
                    let factory = factory
                        .delete(OBJECTS_PATH)
                        .append_path(&format!("/{}/{id}", self.bucket))
                        .append_param(KEY_ETAG, etag);
                    let factory = if delete_mark {
                        factory.append_param(PARAM_DELETE_MARK, "1")
                    } else {
                        factory
                    };
                    factory.build()
                },
                self.timeout,
            )
            .map(|response| {
                if delete_mark {
                    self.to_object(&response)
                } else {
                    BaasObject {
                        data: response.json_object(),
                        ..self.new_object()
                    }
                }
            })
    }
}
