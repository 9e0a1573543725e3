//! Build orchestration: which keys to process and what to do with an existing tome.
//!
//! A [`TomeMaker`] resolves the existing tome's state against the configured
//! [`ExistingBehavior`]s, derives the work queue from the header keyset and then
//! hands out one source record per call to [`TomeMaker::next`]. The caller turns
//! each record into rows and pushes them back with [`TomeMaker::concat`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    str::FromStr,
    sync::Arc,
    time::Instant,
};

use arrow::array::RecordBatch;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::Span;

use crate::{
    error::{TomeError, TomeResult},
    header::{copy_header, KEY_COLUMN},
    layout::TomeLocation,
    loader::TomeLoader,
    manifest::{ManifestData, ManifestSpec, TomeManifest},
    observability::{component_span, log_debug, log_info, log_warn},
    option::{MakeOptions, DEFAULT_LOCATOR_COLUMN},
    page::string_column,
    scribe::Scribe,
    source::{Channels, SourceReader},
    store::BlobStore,
};

/// Policy for a tome that already exists when a build starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingBehavior {
    /// Add the keys that are missing from the tome.
    Continue,
    /// Discard the tome and build it again under a new id.
    Overwrite,
    /// Leave the tome untouched.
    #[default]
    Pass,
    /// Refuse to build.
    Fail,
}

impl ExistingBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExistingBehavior::Continue => "continue",
            ExistingBehavior::Overwrite => "overwrite",
            ExistingBehavior::Pass => "pass",
            ExistingBehavior::Fail => "fail",
        }
    }
}

impl fmt::Display for ExistingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown existing-tome behavior: {0}")]
pub struct ParseBehaviorError(String);

impl FromStr for ExistingBehavior {
    type Err = ParseBehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(ExistingBehavior::Continue),
            "overwrite" => Ok(ExistingBehavior::Overwrite),
            "pass" => Ok(ExistingBehavior::Pass),
            "fail" => Ok(ExistingBehavior::Fail),
            _ => Err(ParseBehaviorError(s.to_string())),
        }
    }
}

/// State of the target tome before a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TomeState {
    Missing,
    Partial,
    Complete,
}

impl TomeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TomeState::Missing => "missing",
            TomeState::Partial => "partial",
            TomeState::Complete => "complete",
        }
    }
}

/// What a build does with its target tome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildAction {
    /// New manifest and id; every header key is processed.
    Fresh,
    /// Adopt the existing manifest; only keys missing from the tome are processed.
    Resume,
    /// Nothing to do.
    Skip,
    /// The policy forbids touching the tome.
    Reject,
}

/// Map an existing tome's state and the configured policies to a build action.
pub fn resolve_action(
    state: TomeState,
    if_complete: ExistingBehavior,
    if_partial: ExistingBehavior,
) -> BuildAction {
    match state {
        TomeState::Missing => BuildAction::Fresh,
        TomeState::Partial => match if_partial {
            ExistingBehavior::Continue => BuildAction::Resume,
            ExistingBehavior::Overwrite => BuildAction::Fresh,
            ExistingBehavior::Pass => BuildAction::Skip,
            ExistingBehavior::Fail => BuildAction::Reject,
        },
        // a complete tome has nothing left to continue with
        TomeState::Complete => match if_complete {
            ExistingBehavior::Continue | ExistingBehavior::Pass => BuildAction::Skip,
            ExistingBehavior::Overwrite => BuildAction::Fresh,
            ExistingBehavior::Fail => BuildAction::Reject,
        },
    }
}

/// One source record handed to the caller.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub key: String,
    pub locator: String,
    pub channels: Channels,
}

struct BuildPlan {
    action: BuildAction,
    queue: VecDeque<String>,
    total: usize,
    locators: HashMap<String, String>,
    existing: Option<ManifestData>,
}

/// Drives one build of one tome.
pub struct TomeMaker {
    store: Arc<dyn BlobStore>,
    location: TomeLocation,
    header: TomeLoader,
    source: Arc<dyn SourceReader>,
    options: MakeOptions,
    locator_column: String,
    metadata: Option<Map<String, Value>>,
    span: Span,
    plan: Option<BuildPlan>,
    scribe: Option<Scribe>,
    current_key: Option<String>,
    keys_done: usize,
    started_at: Option<Instant>,
    finished: bool,
    aborted: bool,
}

impl TomeMaker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        location: TomeLocation,
        header: TomeLoader,
        source: Arc<dyn SourceReader>,
        options: MakeOptions,
    ) -> Self {
        let span = component_span("maker", location.tome_name());
        Self {
            store,
            location,
            header,
            source,
            options,
            locator_column: DEFAULT_LOCATOR_COLUMN.to_string(),
            metadata: None,
            span,
            plan: None,
            scribe: None,
            current_key: None,
            keys_done: 0,
            started_at: None,
            finished: false,
            aborted: false,
        }
    }

    /// Header column holding each key's source locator.
    pub fn with_locator_column(mut self, locator_column: impl Into<String>) -> Self {
        self.locator_column = locator_column.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.header = self.header.with_span(span.clone());
        self.span = span;
        self
    }

    /// Metadata written next to the manifest of a fresh build.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn location(&self) -> &TomeLocation {
        &self.location
    }

    /// Manifest of the build in progress, once a key has been handed out.
    pub fn manifest(&self) -> Option<&ManifestData> {
        self.scribe.as_ref().map(Scribe::manifest)
    }

    pub fn keys_done(&self) -> usize {
        self.keys_done
    }

    /// Number of keys in the work queue, or `None` before planning.
    pub fn keys_total(&self) -> Option<usize> {
        self.plan.as_ref().map(|plan| plan.total)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True once a failed key has stopped the build; the tome stays resumable.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Resolve the build action and work queue; later calls return the cached action.
    pub async fn plan(&mut self) -> TomeResult<BuildAction> {
        if let Some(plan) = &self.plan {
            return Ok(plan.action);
        }

        let (state, existing) = self.existing_state().await?;
        let action = resolve_action(
            state,
            self.options.behavior_if_complete,
            self.options.behavior_if_partial,
        );
        log_info!(
            parent: &self.span,
            component = "maker",
            event = "build_planned",
            tome = %self.location,
            state = state.as_str(),
            action = ?action,
        );

        let plan = match action {
            BuildAction::Reject => {
                return Err(TomeError::PolicyConflict {
                    tome: self.location.tome_name().to_string(),
                    state: state.as_str(),
                });
            }
            BuildAction::Skip => BuildPlan {
                action,
                queue: VecDeque::new(),
                total: 0,
                locators: HashMap::new(),
                existing: None,
            },
            BuildAction::Fresh => self.queue(action, HashSet::new(), None).await?,
            BuildAction::Resume => {
                let mut existing_loader =
                    TomeLoader::new(Arc::clone(&self.store), self.location.clone());
                // set semantics: a key counts as done once it appears on any page
                let done: HashSet<String> =
                    existing_loader.get_keyset().await?.into_iter().collect();
                self.queue(action, done, existing).await?
            }
        };
        let action = plan.action;
        self.plan = Some(plan);
        Ok(action)
    }

    /// Hand out the next source record, or `None` once the build is done.
    ///
    /// The tome is started when the first key is handed out and finished when
    /// the queue runs dry. An empty queue never touches storage.
    pub async fn next(&mut self) -> TomeResult<Option<SourceItem>> {
        self.ensure_live()?;
        self.plan().await?;
        if self.finished {
            return Ok(None);
        }

        let Some(key) = self.plan.as_mut().and_then(|plan| plan.queue.pop_front()) else {
            self.finish().await?;
            return Ok(None);
        };
        match self.read_key(&key).await {
            Ok(item) => Ok(Some(item)),
            Err(err) => {
                self.abort(key, &err);
                Err(err)
            }
        }
    }

    async fn read_key(&mut self, key: &str) -> TomeResult<SourceItem> {
        if self.scribe.is_none() {
            self.start().await?;
        }

        let locator = self.locator(key)?;
        let channels = self
            .source
            .read_channels(&locator, self.options.instructions.as_deref())
            .await
            .map_err(|err| TomeError::Upstream {
                locator: locator.clone(),
                source: Box::new(err),
            })?;

        self.current_key = Some(key.to_string());
        self.keys_done += 1;
        self.log_status();
        Ok(SourceItem {
            key: key.to_string(),
            locator,
            channels,
        })
    }

    /// Stop handing out keys. Pages already flushed stay as they are and the
    /// manifest is never marked complete by this maker.
    fn abort(&mut self, key: String, err: &TomeError) {
        log_warn!(
            parent: &self.span,
            component = "maker",
            event = "build_aborted",
            tome = %self.location,
            key = %key,
            error = %err,
        );
        if let Some(plan) = self.plan.as_mut() {
            plan.queue.push_front(key);
        }
        self.current_key = None;
        self.aborted = true;
    }

    fn ensure_live(&self) -> TomeResult<()> {
        if self.aborted {
            return Err(TomeError::BuildAborted {
                tome: self.location.tome_name().to_string(),
            });
        }
        Ok(())
    }

    /// Append `rows` to the tome under the key most recently handed out.
    pub async fn concat(&mut self, rows: RecordBatch) -> TomeResult<()> {
        self.ensure_live()?;
        let (Some(key), Some(scribe)) = (&self.current_key, self.scribe.as_mut()) else {
            return Err(TomeError::NoCurrentKey);
        };
        scribe.concat(rows, key.as_str()).await
    }

    /// Run the whole build, turning each record into rows with `transform`.
    ///
    /// Returning `None` from `transform` contributes no rows for that key.
    pub async fn run<F>(&mut self, mut transform: F) -> TomeResult<BuildAction>
    where
        F: FnMut(&SourceItem) -> TomeResult<Option<RecordBatch>>,
    {
        let action = self.plan().await?;
        while let Some(item) = self.next().await? {
            if let Some(rows) = transform(&item)? {
                self.concat(rows).await?;
            }
        }
        Ok(action)
    }

    async fn existing_state(&self) -> TomeResult<(TomeState, Option<ManifestData>)> {
        let mut loader = TomeLoader::new(Arc::clone(&self.store), self.location.clone())
            .with_span(self.span.clone());
        if !loader.exists().await? {
            return Ok((TomeState::Missing, None));
        }
        let manifest = loader.manifest().await?.clone();
        let state = if manifest.is_complete {
            TomeState::Complete
        } else {
            TomeState::Partial
        };
        Ok((state, Some(manifest)))
    }

    async fn queue(
        &mut self,
        action: BuildAction,
        done: HashSet<String>,
        existing: Option<ManifestData>,
    ) -> TomeResult<BuildPlan> {
        let mut seen = HashSet::new();
        let queue: VecDeque<String> = self
            .header
            .get_keyset()
            .await?
            .into_iter()
            .filter(|key| !done.contains(key) && seen.insert(key.clone()))
            .collect();
        let locators = if queue.is_empty() {
            HashMap::new()
        } else {
            self.header_locators().await?
        };
        log_debug!(
            parent: &self.span,
            component = "maker",
            event = "work_queue",
            keys = queue.len(),
            already_done = done.len(),
        );
        Ok(BuildPlan {
            action,
            total: queue.len(),
            queue,
            locators,
            existing,
        })
    }

    async fn header_locators(&mut self) -> TomeResult<HashMap<String, String>> {
        let rows = self.header.get_dataframe().await?;
        let keys = string_column(&rows, KEY_COLUMN)?;
        let locators = string_column(&rows, &self.locator_column)?;
        Ok(keys
            .iter()
            .zip(locators.iter())
            .filter_map(|(key, locator)| Some((key?.to_string(), locator?.to_string())))
            .collect())
    }

    fn locator(&self, key: &str) -> TomeResult<String> {
        self.plan
            .as_ref()
            .and_then(|plan| plan.locators.get(key))
            .cloned()
            .ok_or_else(|| TomeError::UnknownKey {
                key: key.to_string(),
            })
    }

    async fn start(&mut self) -> TomeResult<()> {
        let (action, existing) = match self.plan.as_mut() {
            Some(plan) => (plan.action, plan.existing.take()),
            None => return Ok(()),
        };
        let header_name = self.header.location().tome_name().to_string();
        let spec = ManifestSpec {
            header_tome_name: Some(header_name),
            ..ManifestSpec::default()
        };
        let manifest = TomeManifest::create(self.location.clone(), spec);
        let mut scribe = Scribe::new(
            manifest,
            Arc::clone(&self.store),
            self.options.paging.clone(),
        )
        .with_span(self.span.clone());

        match (action, existing) {
            (BuildAction::Resume, Some(existing)) => scribe.set_manifest_data(existing),
            _ => {
                copy_header(
                    Arc::clone(&self.store),
                    &mut self.header,
                    &self.location,
                    &self.span,
                )
                .await?;
                if let Some(metadata) = self.metadata.take() {
                    scribe = scribe.with_metadata(metadata);
                }
            }
        }

        scribe.start().await?;
        self.started_at = Some(Instant::now());
        self.scribe = Some(scribe);
        Ok(())
    }

    async fn finish(&mut self) -> TomeResult<()> {
        if let Some(scribe) = self.scribe.as_mut() {
            scribe.finish().await?;
        }
        self.finished = true;
        self.current_key = None;
        log_info!(
            parent: &self.span,
            component = "maker",
            event = "build_finished",
            tome = %self.location,
            keys_done = self.keys_done,
        );
        Ok(())
    }

    fn log_status(&self) {
        let frequency = self.options.print_status_frequency;
        if self.keys_done % frequency != 0 {
            return;
        }
        let total = self.keys_total().unwrap_or(0).max(1);
        let elapsed = self
            .started_at
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or_default();
        let remaining_keys = total.saturating_sub(self.keys_done);
        let remaining = elapsed / self.keys_done as f64 * remaining_keys as f64;
        log_info!(
            parent: &self.span,
            component = "maker",
            event = "build_progress",
            keys_done = self.keys_done,
            keys_total = total,
            percent_complete = self.keys_done as f64 / total as f64 * 100.0,
            elapsed_secs = elapsed as u64,
            remaining_secs = remaining as u64,
        );
    }
}
