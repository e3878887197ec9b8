use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::auth::FirebaseAuth;
use crate::error::StoreError;
use crate::models::timestamp;
use crate::store::{Direction, DocumentStore, Query, SetOptions, StoredDocument};

const BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

#[derive(Clone)]
pub struct FirestoreClient {
    client: Client,
    auth: FirebaseAuth,
    project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub name: String,
    pub fields: Option<Map<String, Value>>,
    #[serde(rename = "createTime")]
    pub create_time: Option<String>,
    #[serde(rename = "updateTime")]
    pub update_time: Option<String>,
}

impl Document {
    /// Path relative to the database root, e.g. `users/abc`.
    pub fn path(&self) -> &str {
        match self.name.split_once("/documents/") {
            Some((_, path)) => path,
            None => &self.name,
        }
    }

    /// Fields decoded into plain JSON.
    pub fn data(&self) -> Value {
        match self.fields {
            Some(ref fields) => parse_firestore_fields(&Value::Object(fields.clone())),
            None => json!({}),
        }
    }

    pub fn into_stored(self) -> StoredDocument {
        StoredDocument::new(self.path(), self.data())
    }
}

#[derive(Debug, Deserialize)]
struct ListDocumentsResponse {
    documents: Option<Vec<Document>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    document: Option<Document>,
}

impl FirestoreClient {
    pub fn new(auth: FirebaseAuth, project_id: &str) -> Self {
        Self {
            client: Client::new(),
            auth,
            project_id: project_id.to_string(),
        }
    }

    fn documents_base(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            BASE_URL, self.project_id
        )
    }

    fn document_name(&self, path: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{}",
            self.project_id, path
        )
    }

    async fn send(&self, method: &'static str, path: &str, req: RequestBuilder) -> Result<Response> {
        let token = self.auth.get_id_token().await?;
        debug!(method, path, "firestore request");
        let resp = req.bearer_auth(&token).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound(path.to_string()).into());
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(StoreError::PermissionDenied(format!("{} {}", method, path)).into());
            }
            return Err(StoreError::Http {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(resp)
    }

    pub async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let url = format!("{}/{}", self.documents_base(), path);
        match self.send("GET", path, self.client.get(&url)).await {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(e) if StoreError::is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_documents(
        &self,
        collection_path: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<(Vec<Document>, Option<String>)> {
        let url = format!("{}/{}", self.documents_base(), collection_path);

        let mut req = self.client.get(&url);

        if let Some(size) = page_size {
            req = req.query(&[("pageSize", size.to_string())]);
        }
        if let Some(pt) = page_token {
            req = req.query(&[("pageToken", pt)]);
        }

        let resp = self.send("LIST", collection_path, req).await?;
        let list_resp: ListDocumentsResponse = resp.json().await?;
        Ok((
            list_resp.documents.unwrap_or_default(),
            list_resp.next_page_token,
        ))
    }

    /// Every document of a collection, following page tokens.
    pub async fn list_all_documents(&self, collection_path: &str) -> Result<Vec<Document>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let (docs, next) = self
                .list_documents(collection_path, Some(PAGE_SIZE), page_token.as_deref())
                .await?;
            all.extend(docs);

            match next {
                Some(pt) if !pt.is_empty() => page_token = Some(pt),
                _ => break,
            }
        }

        Ok(all)
    }

    pub async fn run_query(
        &self,
        parent_path: Option<&str>,
        structured_query: Value,
    ) -> Result<Vec<Document>> {
        let parent = match parent_path {
            Some(p) => format!("{}/{}", self.documents_base(), p),
            None => self.documents_base(),
        };
        let url = format!("{}:runQuery", parent);

        let body = json!({
            "structuredQuery": structured_query
        });

        let resp = self
            .send("runQuery", parent_path.unwrap_or(""), self.client.post(&url).json(&body))
            .await?;

        let results: Vec<RunQueryResponse> = resp.json().await?;
        Ok(results.into_iter().filter_map(|r| r.document).collect())
    }

    /// Update (PATCH) specific fields in a document.
    ///
    /// Without `field_paths` the document is replaced. With `must_exist` a
    /// missing document fails with [`StoreError::NotFound`] instead of being created.
    pub async fn patch_document(
        &self,
        path: &str,
        fields: Map<String, Value>,
        field_paths: &[String],
        must_exist: bool,
    ) -> Result<Document> {
        let url = format!("{}/{}", self.documents_base(), path);

        let mut req = self.client.patch(&url);

        for fp in field_paths {
            req = req.query(&[("updateMask.fieldPaths", fp.as_str())]);
        }
        if must_exist {
            req = req.query(&[("currentDocument.exists", "true")]);
        }

        let body = json!({
            "fields": fields
        });

        let resp = self.send("PATCH", path, req.json(&body)).await?;
        Ok(resp.json().await?)
    }

    /// Create a document with a server-generated ID.
    pub async fn create_document(
        &self,
        collection_path: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let url = format!("{}/{}", self.documents_base(), collection_path);
        let body = json!({ "fields": fields });
        let resp = self
            .send("POST", collection_path, self.client.post(&url).json(&body))
            .await?;
        Ok(resp.json().await?)
    }

    /// Server-side array union on one field of an existing document.
    pub async fn append_missing(&self, path: &str, field: &str, values: &[Value]) -> Result<()> {
        let url = format!("{}:commit", self.documents_base());
        let body = append_write(&self.document_name(path), field, values);
        self.send("commit", path, self.client.post(&url).json(&body))
            .await?;
        Ok(())
    }

    pub async fn delete_document(&self, path: &str) -> Result<()> {
        let url = format!("{}/{}", self.documents_base(), path);
        match self.send("DELETE", path, self.client.delete(&url)).await {
            Ok(_) => Ok(()),
            Err(e) if StoreError::is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn object_fields(path: &str, doc: &Value) -> Result<Map<String, Value>> {
    match doc {
        Value::Object(_) => Ok(to_firestore_fields(doc)),
        _ => Err(StoreError::Malformed {
            path: path.to_string(),
            reason: "expected an object".to_string(),
        }
        .into()),
    }
}

fn mask_for(fields: &Map<String, Value>) -> Vec<String> {
    fields.keys().map(|k| quote_field_path(k)).collect()
}

/// Update mask for a `set`. An empty mask replaces the whole document, so a
/// merge with no fields writes nothing.
fn set_mask(fields: &Map<String, Value>, options: SetOptions) -> Option<Vec<String>> {
    match (options.merge, fields.is_empty()) {
        (true, true) => None,
        (true, false) => Some(mask_for(fields)),
        (false, _) => Some(Vec::new()),
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.get_document(path).await?.map(|doc| doc.data()))
    }

    async fn set(&self, path: &str, doc: Value, options: SetOptions) -> Result<()> {
        let fields = object_fields(path, &doc)?;
        let Some(mask) = set_mask(&fields, options) else {
            debug!(path, "empty merge, nothing to write");
            return Ok(());
        };
        self.patch_document(path, fields, &mask, false).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        let fields = object_fields(path, &fields)?;
        let mask = mask_for(&fields);
        self.patch_document(path, fields, &mask, true).await?;
        Ok(())
    }

    async fn append(&self, path: &str, field: &str, values: Vec<Value>) -> Result<()> {
        self.append_missing(path, field, &values).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.delete_document(path).await
    }

    async fn add(&self, collection: &str, doc: Value) -> Result<String> {
        let fields = object_fields(collection, &doc)?;
        let created = self.create_document(collection, fields).await?;
        Ok(created.into_stored().id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let docs = self.list_all_documents(collection).await?;
        Ok(docs.into_iter().map(Document::into_stored).collect())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>> {
        let docs = self
            .run_query(query.parent.as_deref(), structured_query(query))
            .await
            .with_context(|| format!("querying {}", query.collection_id))?;
        Ok(docs.into_iter().map(Document::into_stored).collect())
    }
}

/// Commit body appending `values` to `field` of the named document, which
/// must already exist.
pub fn append_write(document_name: &str, field: &str, values: &[Value]) -> Value {
    let values: Vec<Value> = values.iter().map(to_firestore_value).collect();
    json!({
        "writes": [{
            "transform": {
                "document": document_name,
                "fieldTransforms": [{
                    "fieldPath": quote_field_path(field),
                    "appendMissingElements": { "values": values }
                }]
            },
            "currentDocument": { "exists": true }
        }]
    })
}

/// Firestore `StructuredQuery` for a [`Query`].
pub fn structured_query(query: &Query) -> Value {
    let mut body = json!({
        "from": [{
            "collectionId": query.collection_id,
            "allDescendants": query.all_descendants
        }]
    });

    let filters: Vec<Value> = query
        .filters
        .iter()
        .map(|(field, value)| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field },
                    "op": "EQUAL",
                    "value": to_firestore_value(value)
                }
            })
        })
        .collect();

    match filters.len() {
        0 => {}
        1 => body["where"] = filters.into_iter().next().unwrap_or_default(),
        _ => {
            body["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": filters }
            })
        }
    }

    if let Some((field, direction)) = &query.order_by {
        let direction = match direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };
        body["orderBy"] = json!([{ "field": { "fieldPath": field }, "direction": direction }]);
    }

    body
}

/// Backtick-quote a field name unless it is a simple identifier.
pub fn quote_field_path(key: &str) -> String {
    let simple = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        key.to_string()
    } else {
        format!("`{}`", key.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Convert a serde_json::Value into Firestore's typed value format.
pub fn to_firestore_value(val: &Value) -> Value {
    match val {
        Value::Null => json!({"nullValue": null}),
        Value::Bool(b) => json!({"booleanValue": b}),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({"integerValue": i.to_string()})
            } else if let Some(f) = n.as_f64() {
                json!({"doubleValue": f})
            } else {
                json!({"integerValue": n.to_string()})
            }
        }
        Value::String(s) if timestamp::is_formatted(s) => json!({"timestampValue": s}),
        Value::String(s) => json!({"stringValue": s}),
        Value::Array(arr) => {
            let values: Vec<Value> = arr.iter().map(to_firestore_value).collect();
            json!({"arrayValue": {"values": values}})
        }
        Value::Object(map) => {
            let mut fields = Map::new();
            for (k, v) in map {
                fields.insert(k.clone(), to_firestore_value(v));
            }
            json!({"mapValue": {"fields": fields}})
        }
    }
}

/// Convert a flat JSON object into Firestore fields format.
pub fn to_firestore_fields(obj: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(map) = obj.as_object() {
        for (k, v) in map {
            fields.insert(k.clone(), to_firestore_value(v));
        }
    }
    fields
}

/// Parse a Firestore typed value into a serde_json::Value.
pub fn parse_firestore_value(val: &Value) -> Value {
    if let Some(s) = val.get("stringValue") {
        return s.clone();
    }
    if let Some(i) = val.get("integerValue") {
        // Firestore sends integers as strings
        if let Some(s) = i.as_str() {
            if let Ok(n) = s.parse::<i64>() {
                return json!(n);
            }
        }
        return i.clone();
    }
    if let Some(d) = val.get("doubleValue") {
        return d.clone();
    }
    if let Some(b) = val.get("booleanValue") {
        return b.clone();
    }
    if val.get("nullValue").is_some() {
        return Value::Null;
    }
    if let Some(ts) = val.get("timestampValue") {
        // the server trims fractional digits; restore the fixed width
        return match ts.as_str().map(chrono::DateTime::parse_from_rfc3339) {
            Some(Ok(t)) => json!(timestamp::format(&t.with_timezone(&chrono::Utc))),
            _ => ts.clone(),
        };
    }
    if let Some(r) = val.get("referenceValue") {
        return r.clone();
    }
    if let Some(geo) = val.get("geoPointValue") {
        return geo.clone();
    }
    if let Some(bytes) = val.get("bytesValue") {
        return bytes.clone();
    }
    if let Some(map) = val.get("mapValue") {
        if let Some(fields) = map.get("fields") {
            return parse_firestore_fields(fields);
        }
        return json!({});
    }
    if let Some(arr) = val.get("arrayValue") {
        if let Some(values) = arr.get("values").and_then(|v| v.as_array()) {
            return Value::Array(values.iter().map(parse_firestore_value).collect());
        }
        return json!([]);
    }

    // Unknown format, return as-is
    val.clone()
}

/// Parse Firestore document fields into a flat JSON object.
pub fn parse_firestore_fields(fields: &Value) -> Value {
    if let Some(map) = fields.as_object() {
        let mut result = Map::new();
        for (key, val) in map {
            result.insert(key.clone(), parse_firestore_value(val));
        }
        Value::Object(result)
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_round_trip() {
        let plan = json!({
            "planName": "Week 1",
            "isPublic": false,
            "servings": 4,
            "cost": 2.5,
            "note": null,
            "familyMembers": [{"name": "Ana", "type": "Adult"}],
            "meals": {"Ana": {"breakfast": "Oatmeal", "lunch": ""}}
        });
        let fields = to_firestore_fields(&plan);
        assert_eq!(fields["servings"], json!({"integerValue": "4"}));
        assert_eq!(fields["cost"], json!({"doubleValue": 2.5}));
        assert_eq!(parse_firestore_fields(&Value::Object(fields)), plan);
    }

    #[test]
    fn timestamps_read_as_strings() {
        let parsed = parse_firestore_value(&json!({"timestampValue": "2024-05-01T12:00:00Z"}));
        assert_eq!(parsed, json!("2024-05-01T12:00:00.000000Z"));
        let odd = parse_firestore_value(&json!({"timestampValue": "yesterday"}));
        assert_eq!(odd, json!("yesterday"));
        assert_eq!(parse_firestore_value(&json!({"arrayValue": {}})), json!([]));
        assert_eq!(parse_firestore_value(&json!({"mapValue": {}})), json!({}));
    }

    #[test]
    fn document_paths_and_data() {
        let doc: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/users/u1/mealPlans/abc",
            "fields": {"planName": {"stringValue": "A"}}
        }))
        .unwrap();
        assert_eq!(doc.path(), "users/u1/mealPlans/abc");
        let stored = doc.into_stored();
        assert_eq!(stored.id, "abc");
        assert_eq!(stored.parent_id(), Some("u1"));
        assert_eq!(stored.data, json!({"planName": "A"}));
    }

    #[test]
    fn query_body() {
        let query = Query::collection_group("mealPlans")
            .where_eq("isPublic", true)
            .order_by("createdAt", Direction::Descending);
        let body = structured_query(&query);
        assert_eq!(body["from"][0]["collectionId"], "mealPlans");
        assert_eq!(body["from"][0]["allDescendants"], true);
        assert_eq!(body["where"]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(body["where"]["fieldFilter"]["value"], json!({"booleanValue": true}));
        assert_eq!(body["orderBy"][0]["direction"], "DESCENDING");

        let two = structured_query(
            &Query::collection("users").where_eq("isAdmin", false).where_eq("name", "x"),
        );
        assert_eq!(two["where"]["compositeFilter"]["filters"].as_array().unwrap().len(), 2);
        assert!(two.get("orderBy").is_none());
    }

    #[test]
    fn created_times_are_native_timestamps() {
        let written = timestamp::now();
        let fields = to_firestore_fields(&json!({"createdAt": written, "text": "2024-05-01"}));
        assert_eq!(fields["createdAt"], json!({"timestampValue": written}));
        assert_eq!(fields["text"], json!({"stringValue": "2024-05-01"}));

        let query = Query::collection("posts").where_eq("createdAt", written.as_str());
        let body = structured_query(&query);
        assert!(body["where"]["fieldFilter"]["value"].get("timestampValue").is_some());

        let read = parse_firestore_value(&json!({"timestampValue": "2024-05-01T12:00:00.5Z"}));
        assert_eq!(read, json!("2024-05-01T12:00:00.500000Z"));
        assert_eq!(to_firestore_value(&read), json!({"timestampValue": read}));
    }

    #[test]
    fn empty_merge_writes_nothing() {
        let empty = Map::new();
        let fields = to_firestore_fields(&json!({"name": "Ana", "Mary Ann": 1}));
        assert_eq!(set_mask(&empty, SetOptions::MERGE), None);
        assert_eq!(set_mask(&empty, SetOptions::REPLACE), Some(Vec::new()));
        assert_eq!(
            set_mask(&fields, SetOptions::MERGE),
            Some(vec!["`Mary Ann`".to_string(), "name".to_string()])
        );
        assert_eq!(set_mask(&fields, SetOptions::REPLACE), Some(Vec::new()));
    }

    #[test]
    fn append_commit_body() {
        let body = append_write(
            "projects/p/databases/(default)/documents/posts/p1",
            "replies",
            &[json!({"id": "r1", "text": "hi"})],
        );
        let write = &body["writes"][0];
        assert_eq!(write["currentDocument"]["exists"], true);
        assert_eq!(
            write["transform"]["document"],
            "projects/p/databases/(default)/documents/posts/p1"
        );
        let transform = &write["transform"]["fieldTransforms"][0];
        assert_eq!(transform["fieldPath"], "replies");
        assert_eq!(
            transform["appendMissingElements"]["values"][0]["mapValue"]["fields"]["text"],
            json!({"stringValue": "hi"})
        );
    }

    #[test]
    fn field_path_quoting() {
        assert_eq!(quote_field_path("planName"), "planName");
        assert_eq!(quote_field_path("_x1"), "_x1");
        assert_eq!(quote_field_path("0101"), "`0101`");
        assert_eq!(quote_field_path("Mary Ann"), "`Mary Ann`");
    }
}
