use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::{meta_keys, Dict, Value};

use super::{FileUpload, Resource, ResourceBase};

/// Stems a search query into a language hint the Adapter's full-text
/// index understands. Pluggable so the core carries no NLP dependency.
pub trait Stemmer: Send + Sync {
    fn stem(&self, query: &str) -> String;
}

/// Produces a highlighted snippet of `text` around occurrences of
/// `query`, bracketed by `start`/`stop` tokens and joined by
/// `fragment_delimiter` when multiple fragments are kept.
pub trait Headliner: Send + Sync {
    fn headline(&self, text: &str, query: &str, start: &str, stop: &str, fragment_delimiter: &str) -> Option<String>;
}

/// A full-text query over a `FullTextView` field (§4.5 "Search"):
/// performs the query through the Adapter, then optionally attaches
/// per-object headline snippets over named fields.
pub struct SearchResource<'a> {
    base: ResourceBase<'a>,
    stemmer: Option<&'a dyn Stemmer>,
    headliner: Option<&'a dyn Headliner>,
    headline_fields: Vec<String>,
    start_token: String,
    stop_token: String,
    fragment_delimiter: String,
}

impl<'a> SearchResource<'a> {
    pub fn new(mut base: ResourceBase<'a>, query_text: String, language: Option<String>) -> Self {
        if let Some(fq) = base.list.last_mut().query.fulltext.as_mut() {
            fq.query = query_text;
            if fq.language.is_none() {
                fq.language = language;
            }
        }
        Self {
            base,
            stemmer: None,
            headliner: None,
            headline_fields: Vec::new(),
            start_token: "<b>".to_string(),
            stop_token: "</b>".to_string(),
            fragment_delimiter: " ... ".to_string(),
        }
    }

    /// Derives the language hint from the query text when none was
    /// supplied explicitly.
    pub fn with_stemmer(mut self, stemmer: &'a dyn Stemmer) -> Self {
        let needs_language = self.base.list.last().query.fulltext.as_ref().map(|q| q.language.is_none()).unwrap_or(false);
        if needs_language {
            let hint = stemmer.stem(&self.query_text());
            if let Some(fq) = self.base.list.last_mut().query.fulltext.as_mut() {
                fq.language = Some(hint);
            }
        }
        self.stemmer = Some(stemmer);
        self
    }

    pub fn with_headliner(mut self, headliner: &'a dyn Headliner, fields: Vec<String>) -> Self {
        self.headliner = Some(headliner);
        self.headline_fields = fields;
        self
    }

    fn query_text(&self) -> String {
        self.base.list.last().query.fulltext.as_ref().map(|q| q.query.clone()).unwrap_or_default()
    }

    fn apply_headlines(&self, value: &mut Value) {
        let Some(headliner) = self.headliner else { return };
        if self.headline_fields.is_empty() {
            return;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    self.headline_one(item, headliner);
                }
            }
            Value::Dict(_) => self.headline_one(value, headliner),
            _ => {}
        }
    }

    fn headline_one(&self, value: &mut Value, headliner: &dyn Headliner) {
        let Some(dict) = value.as_dict() else { return };
        let query = self.query_text();
        let mut headlines = Dict::new();
        for field in &self.headline_fields {
            if let Some(text) = dict.get(field).and_then(Value::as_str) {
                if let Some(snippet) =
                    headliner.headline(text, &query, &self.start_token, &self.stop_token, &self.fragment_delimiter)
                {
                    headlines.insert(field.clone(), Value::String(snippet));
                }
            }
        }
        if !headlines.is_empty() {
            if let Some(dict) = value.as_dict_mut() {
                dict.insert(meta_keys::HEADLINES.to_string(), Value::Dict(headlines));
            }
        }
    }
}

#[async_trait]
impl<'a> Resource for SearchResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        false
    }

    async fn remove_object(&self) -> Result<bool> {
        Err(Error::NotImplemented("search results are read-only".into()))
    }

    async fn create_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("search results are read-only".into()))
    }

    async fn update_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("search results are read-only".into()))
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("search results are read-only".into()))
    }

    async fn get_result_object(&self) -> Result<Value> {
        self.base.require_permission(Action::Read)?;
        let result = self.base.ctx.adapter.select(self.base.ctx.worker, &self.base.list).await?;
        let mut result = self.base.hydrate_result(result).await?;
        self.apply_headlines(&mut result);
        Ok(result)
    }

    fn max_request_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_request_size).unwrap_or(1 << 20)
    }

    fn max_var_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_var_size).unwrap_or(1 << 16)
    }

    fn max_file_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_file_size).unwrap_or(10 << 20)
    }
}
