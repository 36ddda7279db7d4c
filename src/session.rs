use crate::config::{DASHBOARD_PATH, env_u64, env_usize};
use crate::listing::{
    FieldUpdate, ImageIngestionPipeline, ImageSet, ListingRules, ProductService, SelectedFile,
    SubmissionError, SubmissionPipeline, SubmissionReceipt, WizardStateMachine, WizardStep,
    geo::{LocationReport, LocationWarning, ReverseGeocoder, coordinates_in_range},
    images::spawn_decodes,
    submission::SubmissionPhase,
};
use crate::models::{DraftView, ImageView, Notice, WizardView};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One mounted wizard: the state machine, its images and the submission phase.
pub struct WizardSession {
    id: Uuid,
    owner: String,
    created_at: DateTime<Utc>,
    touched_at: DateTime<Utc>,
    wizard: WizardStateMachine,
    images: ImageSet,
    phase: SubmissionPhase,
    last_error: Option<String>,
    alive: Arc<AtomicBool>,
}

pub type SessionHandle = Arc<Mutex<WizardSession>>;

impl WizardSession {
    fn new(owner: String, rules: ListingRules, premium_user: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            created_at: now,
            touched_at: now,
            wizard: WizardStateMachine::new(rules, premium_user),
            images: ImageSet::default(),
            phase: SubmissionPhase::Idle,
            last_error: None,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn wizard(&self) -> &WizardStateMachine {
        &self.wizard
    }

    #[cfg(test)]
    pub fn images(&self) -> &ImageSet {
        &self.images
    }

    #[cfg(test)]
    pub fn phase(&self) -> SubmissionPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Snapshot for the client. Data-URL previews are only embedded when asked
    /// for; every image still reports whether its preview is ready.
    pub fn view(&self, include_previews: bool) -> WizardView {
        let count = self.images.len();
        let draft = self.wizard.draft();
        WizardView {
            id: self.id.to_string(),
            step: self.wizard.step().number(),
            step_name: self.wizard.step(),
            can_proceed: self.wizard.can_proceed(self.wizard.step(), count),
            gates: WizardStep::ALL
                .iter()
                .map(|step| self.wizard.can_proceed(*step, count))
                .collect(),
            draft: DraftView {
                title: draft.title.clone(),
                description: draft.description.clone(),
                price: draft.price,
                premium: draft.premium,
                exchange_mode: draft.exchange_mode,
                allow_buying: draft.allow_buying(),
                barter_only: draft.barter_only(),
                location: draft.location.clone(),
                condition: draft.condition,
                category: draft.category,
            },
            images: self
                .images
                .entries()
                .iter()
                .enumerate()
                .map(|(index, entry)| ImageView {
                    index,
                    id: entry.id.to_string(),
                    name: entry.name.clone(),
                    mime_type: entry.mime_type.clone(),
                    size: entry.size(),
                    preview_ready: entry.preview.is_some(),
                    preview: entry.preview.clone().filter(|_| include_previews),
                })
                .collect(),
            pending_previews: self.images.pending_previews(),
            submission: self.phase,
            last_error: self.last_error.clone(),
            rules: self.wizard.rules().profile.to_string(),
            created_at: self.created_at,
        }
    }

    pub fn set_fields(&mut self, updates: Vec<FieldUpdate>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for update in FieldUpdate::coalesce_toggles(updates) {
            let field = update.name();
            if let Err(warning) = self.wizard.set_field(update) {
                debug!(target = "barter.wizard", wizard_id = %self.id, field, %warning, "field update rejected");
                notices.push(Notice::warning(&warning));
            }
        }
        notices
    }

    pub fn advance(&mut self) -> bool {
        self.wizard.advance(self.images.len())
    }

    pub fn retreat(&mut self) -> bool {
        self.wizard.retreat()
    }

    pub fn remove_image(&mut self, index: usize) -> bool {
        self.images.remove(index).is_some()
    }

    fn idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.touched_at < cutoff && self.phase != SubmissionPhase::Submitting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_ttl: Duration,
    pub max_per_member: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60 * 60),
            max_per_member: 5,
        }
    }
}

impl SessionLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            idle_ttl: env_u64("WIZARD_IDLE_TTL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_ttl),
            max_per_member: env_usize("MAX_WIZARDS_PER_MEMBER")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_per_member),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("you already have {max} listings in progress; finish or discard one first")]
pub struct WizardLimitReached {
    pub max: usize,
}

struct SessionEntry {
    owner: String,
    handle: SessionHandle,
}

/// Every mounted wizard, keyed by id and scoped to its owner.
#[derive(Clone, Default)]
pub struct WizardSessions {
    limits: SessionLimits,
    inner: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
}

impl WizardSessions {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            inner: Arc::default(),
        }
    }

    pub async fn open(
        &self,
        owner: &str,
        rules: ListingRules,
        premium_user: bool,
    ) -> Result<SessionHandle, WizardLimitReached> {
        let mut guard = self.inner.lock().await;
        let held = guard.values().filter(|entry| entry.owner == owner).count();
        if held >= self.limits.max_per_member {
            warn!(target = "barter.wizard", owner, held, "wizard limit reached");
            return Err(WizardLimitReached {
                max: self.limits.max_per_member,
            });
        }
        let session = WizardSession::new(owner.to_string(), rules, premium_user);
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        guard.insert(
            id,
            SessionEntry {
                owner: owner.to_string(),
                handle: handle.clone(),
            },
        );
        info!(target = "barter.wizard", wizard_id = %id, owner, "wizard mounted");
        Ok(handle)
    }

    /// Looks a wizard up for its owner and marks it as used.
    pub async fn get(&self, id: Uuid, owner: &str) -> Option<SessionHandle> {
        let handle = {
            let guard = self.inner.lock().await;
            let entry = guard.get(&id).filter(|entry| entry.owner == owner)?;
            entry.handle.clone()
        };
        handle.lock().await.touched_at = Utc::now();
        Some(handle)
    }

    /// Tears a wizard down. Completions still in flight see the cleared
    /// liveness flag and drop their results.
    pub async fn close(&self, id: Uuid, owner: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(entry) = guard.get(&id).filter(|entry| entry.owner == owner) else {
            return false;
        };
        entry.handle.lock().await.alive.store(false, Ordering::SeqCst);
        guard.remove(&id);
        info!(target = "barter.wizard", wizard_id = %id, "wizard torn down");
        true
    }

    /// Drops wizards nobody has touched within the idle TTL. Wizards that are
    /// locked or mid-submission are left for the next sweep.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.limits.idle_ttl) else {
            return 0;
        };
        let cutoff = now - ttl;
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|id, entry| match entry.handle.try_lock() {
            Ok(session) if session.idle_since(cutoff) => {
                session.alive.store(false, Ordering::SeqCst);
                debug!(target = "barter.wizard", wizard_id = %id, "idle wizard evicted");
                false
            }
            _ => true,
        });
        let evicted = before - guard.len();
        if evicted > 0 {
            info!(target = "barter.wizard", evicted, remaining = guard.len(), "idle sweep");
        }
        evicted
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sessions.evict_idle(Utc::now()).await;
            }
        })
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    async fn discard(&self, id: Uuid) {
        self.inner.lock().await.remove(&id);
    }
}

pub struct IngestOutcome {
    pub notices: Vec<Notice>,
    pub accepted: usize,
    /// Resolves once every preview of this batch has been applied or dropped.
    pub previews: JoinHandle<()>,
}

/// Accepts a file selection and starts decoding previews in the background.
/// Each preview lands in its own file's slot as soon as it is ready.
pub async fn ingest_images(
    handle: &SessionHandle,
    pipeline: &ImageIngestionPipeline,
    selection: Vec<SelectedFile>,
) -> IngestOutcome {
    let (report, alive, wizard_id) = {
        let mut session = handle.lock().await;
        let report = pipeline.ingest(&mut session.images, selection);
        (report, session.alive.clone(), session.id)
    };

    let notices = report.warnings.iter().map(Notice::warning).collect();
    let accepted = report.accepted.len();
    let mut decodes = spawn_decodes(report.jobs);
    let target = handle.clone();
    let previews = tokio::spawn(async move {
        while let Some(done) = decodes.join_next().await {
            if !alive.load(Ordering::SeqCst) {
                debug!(target = "barter.images", %wizard_id, "wizard gone; dropping late previews");
                decodes.abort_all();
                return;
            }
            let (id, preview) = match done {
                Ok(result) => result,
                Err(err) => {
                    warn!(target = "barter.images", %wizard_id, error = %err, "preview decode task failed");
                    continue;
                }
            };
            let mut session = target.lock().await;
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            if !session.images.attach_preview(id, preview) {
                debug!(target = "barter.images", %wizard_id, image_id = %id, "image removed before its preview was ready");
            }
        }
    });

    IngestOutcome {
        notices,
        accepted,
        previews,
    }
}

pub async fn apply_location(
    handle: &SessionHandle,
    geocoder: &ReverseGeocoder,
    report: LocationReport,
) -> Vec<Notice> {
    let (latitude, longitude) = match report {
        LocationReport::Failed { error } => {
            return vec![Notice::warning(&LocationWarning::LocationUnavailable {
                reason: error,
            })];
        }
        LocationReport::Coordinates {
            latitude,
            longitude,
        } if !coordinates_in_range(latitude, longitude) => {
            return vec![Notice::warning(&LocationWarning::InvalidCoordinates)];
        }
        LocationReport::Coordinates {
            latitude,
            longitude,
        } => (latitude, longitude),
    };

    let alive = handle.lock().await.alive.clone();
    let label = geocoder.resolve(latitude, longitude).await;
    let mut session = handle.lock().await;
    if alive.load(Ordering::SeqCst) {
        session.wizard.set_location(label);
    }
    Vec::new()
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub receipt: SubmissionReceipt,
    pub navigate_to: String,
}

/// Runs the submission state machine for one wizard. The session lock is
/// released for the network call and re-taken to record the result.
pub async fn submit<S: ProductService>(
    sessions: &WizardSessions,
    handle: &SessionHandle,
    pipeline: &SubmissionPipeline<S>,
) -> Result<SubmitOutcome, SubmissionError> {
    let (prepared, alive, wizard_id, image_count) = {
        let mut session = handle.lock().await;
        if matches!(
            session.phase,
            SubmissionPhase::Submitting | SubmissionPhase::Succeeded
        ) {
            return Err(SubmissionError::InFlight);
        }
        session.phase = SubmissionPhase::Validating;
        let prepared = match pipeline.prepare(session.wizard.draft(), session.images.entries()) {
            Ok(prepared) => prepared,
            Err(err) => {
                session.phase = SubmissionPhase::Idle;
                session.last_error = Some(err.to_string());
                debug!(target = "barter.submit", wizard_id = %session.id, code = err.code(), "draft failed validation");
                return Err(err.into());
            }
        };
        session.phase = SubmissionPhase::Submitting;
        session.last_error = None;
        (
            prepared,
            session.alive.clone(),
            session.id,
            session.images.len(),
        )
    };

    let result = pipeline.send(prepared).await.map(|receipt| {
        let navigate_to = dashboard_link(&receipt);
        SubmitOutcome {
            receipt,
            navigate_to,
        }
    });

    let mut session = handle.lock().await;
    if !alive.load(Ordering::SeqCst) {
        debug!(target = "barter.submit", %wizard_id, "wizard torn down during submission");
        return result;
    }

    match result {
        Ok(outcome) => {
            session.phase = SubmissionPhase::Succeeded;
            session.alive.store(false, Ordering::SeqCst);
            drop(session);
            sessions.discard(wizard_id).await;
            info!(target = "barter.submit", %wizard_id, images = image_count, navigate_to = %outcome.navigate_to, "listing submitted");
            Ok(outcome)
        }
        Err(err) => {
            session.phase = SubmissionPhase::Idle;
            session.last_error = Some(err.user_message());
            Err(err)
        }
    }
}

fn dashboard_link(receipt: &SubmissionReceipt) -> String {
    format!(
        "{}?created={}",
        DASHBOARD_PATH.as_str(),
        urlencoding::encode(&receipt.product.id.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::service::ServiceFailure;
    use crate::listing::submission::tests::RecordingService;
    use crate::listing::draft::ExchangeMode;
    use serde_json::json;

    fn jpeg(name: &str) -> SelectedFile {
        SelectedFile {
            name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: name.as_bytes().to_vec(),
        }
    }

    async fn mounted() -> (WizardSessions, SessionHandle) {
        let sessions = WizardSessions::default();
        let handle = sessions
            .open("user-1", ListingRules::standard(), false)
            .await
            .expect("under the cap");
        (sessions, handle)
    }

    async fn add_images(handle: &SessionHandle, count: usize) -> IngestOutcome {
        let pipeline = ImageIngestionPipeline::new(&ListingRules::standard());
        let files = (0..count).map(|i| jpeg(&format!("photo-{i}.jpg"))).collect();
        ingest_images(handle, &pipeline, files).await
    }

    #[tokio::test]
    async fn lamp_listing_goes_from_photos_to_dashboard() {
        let (sessions, handle) = mounted().await;
        add_images(&handle, 3).await.previews.await.unwrap();
        {
            let mut session = handle.lock().await;
            let notices = session.set_fields(vec![
                FieldUpdate::Title("Desk Lamp".into()),
                FieldUpdate::Description("A working desk lamp, barely used.".into()),
                FieldUpdate::AllowBuying(false),
                FieldUpdate::BarterOnly(true),
            ]);
            assert!(notices.is_empty());
            assert_eq!(session.wizard().draft().exchange_mode, ExchangeMode::BarterOnly);
            for _ in 0..4 {
                assert!(session.view(false).can_proceed);
                assert!(session.advance());
            }
            assert_eq!(session.wizard().step(), WizardStep::Review);
            assert!(session.view(false).gates.iter().all(|gate| *gate));
            assert_eq!(session.images().pending_previews(), 0);
        }

        let service = RecordingService::ok();
        let pipeline = SubmissionPipeline::new(service.clone(), ListingRules::standard());
        let outcome = submit(&sessions, &handle, &pipeline).await.expect("submit");
        assert_eq!(outcome.navigate_to, "/dashboard?created=101");
        assert_eq!(service.call_count(), 1);
        assert_eq!(sessions.len().await, 0);

        let again = submit(&sessions, &handle, &pipeline).await;
        assert!(matches!(again, Err(SubmissionError::InFlight)));
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_price_blocks_the_price_step_until_set() {
        let (_sessions, handle) = mounted().await;
        add_images(&handle, 3).await.previews.await.unwrap();
        let mut session = handle.lock().await;
        session.set_fields(vec![
            FieldUpdate::Title("Desk Lamp".into()),
            FieldUpdate::Description("A working desk lamp, barely used.".into()),
            FieldUpdate::AllowBuying(true),
            FieldUpdate::Price(Some(0.0)),
        ]);
        assert!(session.advance());
        assert!(session.advance());
        assert!(session.advance());
        assert_eq!(session.wizard().step(), WizardStep::Price);
        assert!(!session.view(false).can_proceed);
        assert!(!session.advance());
        assert_eq!(session.wizard().step(), WizardStep::Price);

        session.set_fields(vec![FieldUpdate::Price(Some(150.0))]);
        assert!(session.view(false).can_proceed);
        assert!(session.advance());
        assert_eq!(session.wizard().step(), WizardStep::Review);
    }

    #[tokio::test]
    async fn full_wizard_refuses_more_images() {
        let (_sessions, handle) = mounted().await;
        add_images(&handle, 8).await.previews.await.unwrap();
        let outcome = add_images(&handle, 10).await;
        assert_eq!(outcome.accepted, 0);
        let codes: Vec<_> = outcome
            .notices
            .iter()
            .map(|n| n.detail["code"].clone())
            .collect();
        assert_eq!(codes, vec![json!("image_limit_reached")]);
        outcome.previews.await.unwrap();
        assert_eq!(handle.lock().await.images().len(), 8);
    }

    #[tokio::test]
    async fn previews_stay_aligned_with_their_files() {
        let (_sessions, handle) = mounted().await;
        add_images(&handle, 5).await.previews.await.unwrap();
        let session = handle.lock().await;
        for entry in session.images().entries() {
            let expected = crate::listing::images::to_data_url(&entry.mime_type, &entry.bytes);
            assert_eq!(entry.preview.as_deref(), Some(expected.as_str()));
        }
    }

    #[tokio::test]
    async fn late_previews_are_dropped_after_teardown() {
        let (sessions, handle) = mounted().await;
        let outcome = add_images(&handle, 4).await;
        let id = handle.lock().await.id();
        assert!(sessions.close(id, "user-1").await);
        outcome.previews.await.unwrap();
        let session = handle.lock().await;
        assert!(!session.is_alive());
        assert_eq!(session.images().pending_previews(), 4);
    }

    #[tokio::test]
    async fn failed_submission_keeps_the_draft_for_retry() {
        let (sessions, handle) = mounted().await;
        add_images(&handle, 3).await.previews.await.unwrap();
        handle.lock().await.set_fields(vec![
            FieldUpdate::Title("Desk Lamp".into()),
            FieldUpdate::Description("A working desk lamp, barely used.".into()),
        ]);
        let failure = ServiceFailure::http(
            500,
            Some(json!({"details": "Storage quota exceeded", "message": "Internal"})),
        );
        let pipeline =
            SubmissionPipeline::new(RecordingService::failing(failure), ListingRules::standard());
        let err = submit(&sessions, &handle, &pipeline)
            .await
            .expect_err("service fails");
        assert_eq!(err.user_message(), "Storage quota exceeded");

        let session = handle.lock().await;
        assert_eq!(session.phase(), SubmissionPhase::Idle);
        assert_eq!(session.wizard().draft().title, "Desk Lamp");
        assert_eq!(session.images().len(), 3);
        assert_eq!(
            session.view(false).last_error.as_deref(),
            Some("Storage quota exceeded")
        );
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn invalid_draft_returns_to_idle_without_calling_service() {
        let (sessions, handle) = mounted().await;
        add_images(&handle, 3).await.previews.await.unwrap();
        let service = RecordingService::ok();
        let pipeline = SubmissionPipeline::new(service.clone(), ListingRules::standard());
        let err = submit(&sessions, &handle, &pipeline).await.expect_err("no title");
        assert_eq!(err.user_message(), "please enter a title");
        assert_eq!(service.call_count(), 0);
        assert_eq!(handle.lock().await.phase(), SubmissionPhase::Idle);
    }

    #[tokio::test]
    async fn other_users_cannot_see_a_wizard() {
        let (sessions, handle) = mounted().await;
        let id = handle.lock().await.id();
        assert!(sessions.get(id, "user-1").await.is_some());
        assert!(sessions.get(id, "user-2").await.is_none());
        assert!(!sessions.close(id, "user-2").await);
        assert!(sessions.close(id, "user-1").await);
        assert!(sessions.get(id, "user-1").await.is_none());
    }

    #[tokio::test]
    async fn denied_location_warns_and_leaves_draft_alone() {
        let (_sessions, handle) = mounted().await;
        let geocoder = ReverseGeocoder::new("");
        let notices = apply_location(
            &handle,
            &geocoder,
            LocationReport::Failed {
                error: crate::listing::geo::LocationFailure::PermissionDenied,
            },
        )
        .await;
        assert_eq!(notices.len(), 1);
        assert_eq!(handle.lock().await.wizard().draft().location, None);

        let notices = apply_location(
            &handle,
            &geocoder,
            LocationReport::Coordinates {
                latitude: 38.7223,
                longitude: -9.1393,
            },
        )
        .await;
        assert!(notices.is_empty());
        assert_eq!(
            handle.lock().await.wizard().draft().location.as_deref(),
            Some("38.722300, -9.139300")
        );
    }

    #[tokio::test]
    async fn toggle_order_within_a_batch_does_not_matter() {
        let (_sessions, handle) = mounted().await;
        let mut session = handle.lock().await;
        let notices = session.set_fields(vec![
            FieldUpdate::BarterOnly(false),
            FieldUpdate::AllowBuying(true),
        ]);
        assert!(notices.is_empty());
        assert_eq!(session.wizard().draft().exchange_mode, ExchangeMode::BuyOnly);

        let notices = session.set_fields(vec![
            FieldUpdate::AllowBuying(false),
            FieldUpdate::BarterOnly(false),
        ]);
        assert!(notices.is_empty());
        assert_eq!(session.wizard().draft().exchange_mode, ExchangeMode::BarterOnly);

        let notices = session.set_fields(vec![FieldUpdate::BarterOnly(false)]);
        assert_eq!(notices[0].detail["code"], "barter_required_without_buying");
    }

    #[tokio::test]
    async fn views_embed_previews_only_on_request() {
        let (_sessions, handle) = mounted().await;
        add_images(&handle, 3).await.previews.await.unwrap();
        let session = handle.lock().await;

        let light = session.view(false);
        assert!(light.images.iter().all(|image| image.preview.is_none()));
        assert!(light.images.iter().all(|image| image.preview_ready));

        let full = session.view(true);
        assert!(full.images.iter().all(|image| image.preview.is_some()));
    }

    #[tokio::test]
    async fn members_hold_a_bounded_number_of_wizards() {
        let sessions = WizardSessions::new(SessionLimits {
            max_per_member: 2,
            ..SessionLimits::default()
        });
        let rules = ListingRules::standard();
        let first = sessions.open("user-1", rules.clone(), false).await.unwrap();
        sessions.open("user-1", rules.clone(), false).await.unwrap();
        let refused = sessions.open("user-1", rules.clone(), false).await;
        assert_eq!(refused.err(), Some(WizardLimitReached { max: 2 }));
        assert!(sessions.open("user-2", rules.clone(), false).await.is_ok());

        let id = first.lock().await.id();
        assert!(sessions.close(id, "user-1").await);
        assert!(sessions.open("user-1", rules, false).await.is_ok());
    }

    #[tokio::test]
    async fn idle_wizards_are_evicted() {
        let sessions = WizardSessions::new(SessionLimits {
            idle_ttl: Duration::from_secs(600),
            ..SessionLimits::default()
        });
        let stale = sessions
            .open("user-1", ListingRules::standard(), false)
            .await
            .unwrap();
        let fresh = sessions
            .open("user-1", ListingRules::standard(), false)
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::seconds(500);
        let fresh_id = fresh.lock().await.id();
        fresh.lock().await.touched_at = later;

        let sweep_at = later + chrono::Duration::seconds(200);
        assert_eq!(sessions.evict_idle(sweep_at).await, 1);
        assert!(!stale.lock().await.is_alive());
        assert!(sessions.get(fresh_id, "user-1").await.is_some());
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn submitting_wizards_survive_the_sweep() {
        let (sessions, handle) = mounted().await;
        handle.lock().await.phase = SubmissionPhase::Submitting;
        let far_future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(sessions.evict_idle(far_future).await, 0);


        let mut session = handle.lock().await;
        session.phase = SubmissionPhase::Idle;
        assert_eq!(sessions.evict_idle(far_future).await, 0, "locked wizards are skipped");
        drop(session);
        assert_eq!(sessions.evict_idle(far_future).await, 1);
    }
}
