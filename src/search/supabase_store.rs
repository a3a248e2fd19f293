use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::error::StoreError;
use crate::food::CanonicalFood;
use crate::search::food_store::FoodStore;
use crate::search::hybrid_search::{SearchHit, SearchParams};
use crate::search::nano_vector_db::UpsertOutcome;

pub const DEFAULT_TABLE: &str = "foods";
pub const SEARCH_FUNCTION: &str = "match_foods";

// PostgREST limits URL length; id lookups are chunked.
const ID_LOOKUP_CHUNK: usize = 200;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub table: String,
    pub timeout: Duration,
}

/// Flat row matching `sql/foods.sql`.
#[derive(Debug, Serialize)]
struct FoodRow<'a> {
    external_id: &'a str,
    name: &'a str,
    description: Option<&'a str>,
    brand: Option<&'a str>,
    category: &'a str,
    calories_per_100g: f64,
    protein_per_100g: f64,
    fat_per_100g: f64,
    carbs_per_100g: f64,
    fiber_per_100g: f64,
    sugar_per_100g: f64,
    sodium_per_100g: f64,
    calcium_mg: Option<f64>,
    iron_mg: Option<f64>,
    potassium_mg: Option<f64>,
    vitamin_c_mg: Option<f64>,
    saturated_fat_g: Option<f64>,
    calories_derived: bool,
    data_source: &'a str,
    embedding_text: &'a str,
    embedding: &'a [f32],
}

impl<'a> FoodRow<'a> {
    fn from_food(food: &'a CanonicalFood) -> Result<Self, StoreError> {
        let embedding = food
            .embedding
            .as_deref()
            .ok_or_else(|| StoreError::MissingEmbedding(food.external_id.clone()))?;
        Ok(Self {
            external_id: &food.external_id,
            name: &food.name,
            description: food.description.as_deref(),
            brand: food.brand.as_deref(),
            category: &food.category,
            calories_per_100g: food.calories_per_100g,
            protein_per_100g: food.protein_per_100g,
            fat_per_100g: food.fat_per_100g,
            carbs_per_100g: food.carbs_per_100g,
            fiber_per_100g: food.fiber_per_100g,
            sugar_per_100g: food.sugar_per_100g,
            sodium_per_100g: food.sodium_per_100g,
            calcium_mg: food.nutrients.calcium_mg,
            iron_mg: food.nutrients.iron_mg,
            potassium_mg: food.nutrients.potassium_mg,
            vitamin_c_mg: food.nutrients.vitamin_c_mg,
            saturated_fat_g: food.nutrients.saturated_fat_g,
            calories_derived: food.calories_derived,
            data_source: &food.data_source,
            embedding_text: &food.embedding_text,
            embedding,
        })
    }
}

/// Arguments of the `match_foods` function.
#[derive(Debug, Serialize)]
struct MatchFoodsArgs<'a> {
    query_embedding: &'a [f32],
    match_threshold: f64,
    match_count: usize,
    min_calories: Option<f64>,
    max_calories: Option<f64>,
    min_protein: Option<f64>,
    max_protein: Option<f64>,
    min_carbs: Option<f64>,
    max_carbs: Option<f64>,
    min_fat: Option<f64>,
    max_fat: Option<f64>,
    max_sugar: Option<f64>,
    min_sodium: Option<f64>,
    max_sodium: Option<f64>,
    category_filter: Option<&'a str>,
}

impl<'a> MatchFoodsArgs<'a> {
    fn new(query_embedding: &'a [f32], params: &'a SearchParams) -> Self {
        let f = &params.filters;
        Self {
            query_embedding,
            match_threshold: params.match_threshold,
            match_count: params.match_count,
            min_calories: f.min_calories,
            max_calories: f.max_calories,
            min_protein: f.min_protein,
            max_protein: f.max_protein,
            min_carbs: f.min_carbs,
            max_carbs: f.max_carbs,
            min_fat: f.min_fat,
            max_fat: f.max_fat,
            max_sugar: f.max_sugar,
            min_sodium: f.min_sodium,
            max_sodium: f.max_sodium,
            category_filter: f.category.as_deref(),
        }
    }
}

/// Builds a PostgREST `in.(...)` list with every value double-quoted.
fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Supabase (PostgREST + pgvector) implementation of [`FoodStore`].
pub struct SupabaseStore {
    client: Client,
    config: SupabaseConfig,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .timeout(self.config.timeout)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.config.timeout)
            } else {
                StoreError::Network(e)
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        Err(StoreError::Api { status, body })
    }
}

#[derive(serde::Deserialize)]
struct IdRow {
    external_id: String,
}

impl FoodStore for SupabaseStore {
    async fn upsert(&self, foods: Vec<CanonicalFood>) -> Result<UpsertOutcome, StoreError> {
        if foods.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let rows = foods.iter().map(FoodRow::from_food).collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<String> = foods.iter().map(|f| f.external_id.clone()).collect();
        let existing = self.existing_ids(&ids).await?;

        let request = self
            .authorized(self.client.post(self.rest_url(&self.config.table)))
            .query(&[("on_conflict", "external_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows);
        self.send(request).await?;

        let mut outcome = UpsertOutcome::default();
        for id in ids {
            if existing.contains(&id) {
                outcome.updated.push(id);
            } else {
                outcome.inserted.push(id);
            }
        }
        debug!(
            inserted = outcome.inserted.len(),
            updated = outcome.updated.len(),
            "supabase upsert"
        );
        Ok(outcome)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let request = self
                .authorized(self.client.get(self.rest_url(&self.config.table)))
                .query(&[("select", "external_id".to_string()), ("external_id", in_list(chunk))]);
            let rows: Vec<IdRow> = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(StoreError::Network)?;
            found.extend(rows.into_iter().map(|r| r.external_id));
        }
        Ok(found)
    }

    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchHit>, StoreError> {
        let args = MatchFoodsArgs::new(query, params);
        let request = self
            .authorized(self.client.post(self.rest_url(&format!("rpc/{}", SEARCH_FUNCTION))))
            .json(&args);
        let hits: Vec<SearchHit> = self.send(request).await?.json().await.map_err(StoreError::Network)?;
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food::Micronutrients;
    use crate::search::hybrid_search::SearchFilters;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const SERVICE_KEY: &str = "service-key";

    fn sample_food(id: &str) -> CanonicalFood {
        CanonicalFood {
            external_id: id.into(),
            name: "Milk".into(),
            description: None,
            brand: None,
            category: "Dairy".into(),
            calories_per_100g: 61.0,
            protein_per_100g: 3.2,
            fat_per_100g: 3.3,
            carbs_per_100g: 4.8,
            fiber_per_100g: 0.0,
            sugar_per_100g: 5.05,
            sodium_per_100g: 43.0,
            nutrients: Micronutrients { calcium_mg: Some(113.0), ..Default::default() },
            calories_derived: false,
            data_source: "usda".into(),
            embedding_text: "milk dairy".into(),
            embedding: Some(vec![0.5, 0.5]),
        }
    }

    /// One request as seen by the mock PostgREST server.
    #[derive(Debug)]
    struct RecordedRequest {
        method: String,
        path: String,
        query: Vec<(String, String)>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl RecordedRequest {
        fn query_value(&self, key: &str) -> Option<&str> {
            self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }

        fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    async fn read_request(stream: &mut TcpStream) -> RecordedRequest {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap().split_whitespace();
        let method = request_line.next().unwrap().to_string();
        let target = request_line.next().unwrap().to_string();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let length: usize = headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mut body = buf[header_end..].to_vec();
        while body.len() < length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }

        let url = reqwest::Url::parse(&format!("http://mock{}", target)).unwrap();
        RecordedRequest {
            method,
            path: url.path().to_string(),
            query: url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect(),
            headers,
            body,
        }
    }

    /// Serves `responses` in order, one connection each, recording every request.
    async fn mock_postgrest(responses: Vec<(u16, String)>) -> (SupabaseStore, Arc<Mutex<Vec<RecordedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut stream).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        let store = SupabaseStore::new(SupabaseConfig {
            url,
            service_key: SERVICE_KEY.to_string(),
            table: DEFAULT_TABLE.to_string(),
            timeout: Duration::from_secs(5),
        });
        (store, requests)
    }

    fn assert_authorized(request: &RecordedRequest) {
        assert_eq!(request.header("apikey"), Some(SERVICE_KEY));
        assert_eq!(request.header("authorization"), Some("Bearer service-key"));
    }

    #[test]
    fn test_in_list_quotes_values() {
        let ids = vec!["123".to_string(), "a,b".to_string(), "q\"x".to_string()];
        assert_eq!(in_list(&ids), r#"in.("123","a,b","q\"x")"#);
    }

    #[test]
    fn test_row_flattens_micronutrients() {
        let food = sample_food("1");
        let json = serde_json::to_value(FoodRow::from_food(&food).unwrap()).unwrap();
        assert_eq!(json["calcium_mg"], 113.0);
        assert_eq!(json["iron_mg"], serde_json::Value::Null);
        assert!(json["brand"].is_null());
        assert_eq!(json["embedding"][1], 0.5);

        let mut no_vector = food.clone();
        no_vector.embedding = None;
        assert!(matches!(FoodRow::from_food(&no_vector), Err(StoreError::MissingEmbedding(_))));
    }

    #[test]
    fn test_unset_filters_are_sent_as_null() {
        let params = SearchParams {
            filters: SearchFilters { min_protein: Some(20.0), ..Default::default() },
            ..Default::default()
        };
        let json = serde_json::to_value(MatchFoodsArgs::new(&[0.1], &params)).unwrap();
        assert_eq!(json["match_threshold"], 0.78);
        assert_eq!(json["match_count"], 20);
        assert_eq!(json["min_protein"], 20.0);
        assert!(json["max_protein"].is_null());
        assert!(json["category_filter"].is_null());
    }

    #[tokio::test]
    async fn test_upsert_checks_ids_then_posts_merge_upsert() {
        let (store, requests) = mock_postgrest(vec![
            (200, r#"[{"external_id":"1"}]"#.to_string()),
            (201, String::new()),
        ])
        .await;

        let mut branded = sample_food("2");
        branded.brand = Some("Kraft".into());
        let outcome = store.upsert(vec![sample_food("1"), branded]).await.unwrap();
        assert_eq!(outcome.updated, vec!["1".to_string()]);
        assert_eq!(outcome.inserted, vec!["2".to_string()]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);

        let lookup = &requests[0];
        assert_eq!(lookup.method, "GET");
        assert_eq!(lookup.path, "/rest/v1/foods");
        assert_eq!(lookup.query_value("select"), Some("external_id"));
        assert_eq!(lookup.query_value("external_id"), Some(r#"in.("1","2")"#));
        assert_authorized(lookup);

        let upsert = &requests[1];
        assert_eq!(upsert.method, "POST");
        assert_eq!(upsert.path, "/rest/v1/foods");
        assert_eq!(upsert.query_value("on_conflict"), Some("external_id"));
        assert_eq!(upsert.header("prefer"), Some("resolution=merge-duplicates,return=minimal"));
        assert_eq!(upsert.header("content-type"), Some("application/json"));
        assert_authorized(upsert);

        let rows = upsert.json();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["external_id"], "1");
        assert!(rows[0]["brand"].is_null());
        assert_eq!(rows[1]["brand"], "Kraft");
        assert_eq!(rows[1]["calcium_mg"], 113.0);
        assert_eq!(rows[1]["embedding"], serde_json::json!([0.5, 0.5]));
        assert!(rows[1].get("nutrients").is_none());
    }

    #[tokio::test]
    async fn test_failed_upsert_surfaces_status_and_body() {
        let (store, requests) = mock_postgrest(vec![
            (200, "[]".to_string()),
            (400, r#"{"message":"column \"brand\" does not exist"}"#.to_string()),
        ])
        .await;

        let err = store.upsert(vec![sample_food("1")]).await.unwrap_err();
        match err {
            StoreError::Api { status, body } => {
                assert_eq!(status.as_u16(), 400);
                assert!(body.contains("brand"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!StoreError::Api { status: reqwest::StatusCode::BAD_REQUEST, body: String::new() }.is_transient());
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_ids_are_looked_up_in_chunks() {
        let (store, requests) = mock_postgrest(vec![
            (200, r#"[{"external_id":"id-0"}]"#.to_string()),
            (200, r#"[{"external_id":"id-200"}]"#.to_string()),
        ])
        .await;

        let ids: Vec<String> = (0..=ID_LOOKUP_CHUNK).map(|i| format!("id-{}", i)).collect();
        let found = store.existing_ids(&ids).await.unwrap();
        assert_eq!(found, HashSet::from(["id-0".to_string(), "id-200".to_string()]));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let first = requests[0].query_value("external_id").unwrap();
        assert!(first.starts_with(r#"in.("id-0","id-1","#));
        assert!(first.ends_with(r#""id-199")"#));
        assert_eq!(requests[1].query_value("external_id"), Some(r#"in.("id-200")"#));
    }

    #[tokio::test]
    async fn test_search_calls_match_foods_and_decodes_rows() {
        let rows = r#"[{
            "id": "1097512",
            "name": "Greek yogurt, plain",
            "category": "Dairy and Egg Products",
            "calories_per_100g": 59.0,
            "protein_per_100g": 10.3,
            "fat_per_100g": 0.4,
            "carbs_per_100g": 3.6,
            "fiber_per_100g": 0.0,
            "sugar_per_100g": 3.2,
            "sodium_per_100g": 36.0,
            "similarity": 0.91
        }]"#;
        let (store, requests) = mock_postgrest(vec![(200, rows.to_string())]).await;

        let params = SearchParams {
            match_threshold: 0.5,
            match_count: 5,
            filters: SearchFilters {
                min_protein: Some(10.0),
                category: Some("Dairy and Egg Products".into()),
                ..Default::default()
            },
        };
        let hits = store.search(&[0.25, -0.5], &params).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1097512");
        assert_eq!(hits[0].name, "Greek yogurt, plain");
        assert_eq!(hits[0].protein_per_100g, 10.3);
        assert_eq!(hits[0].similarity, 0.91);

        let requests = requests.lock().unwrap();
        let call = &requests[0];
        assert_eq!(call.method, "POST");
        assert_eq!(call.path, "/rest/v1/rpc/match_foods");
        assert_authorized(call);
        let args = call.json();
        assert_eq!(args["query_embedding"], serde_json::json!([0.25, -0.5]));
        assert_eq!(args["match_threshold"], 0.5);
        assert_eq!(args["match_count"], 5);
        assert_eq!(args["min_protein"], 10.0);
        assert_eq!(args["category_filter"], "Dairy and Egg Products");
        assert!(args["max_sugar"].is_null());
    }
}
