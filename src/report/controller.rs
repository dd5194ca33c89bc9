use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{DescribeImageInput, ImageDescriber};
use crate::report::delivery::{ReportSink, Submission};
use crate::report::draft::{render_preview, ImageFile, IntakeSource, Preview};
use crate::report::geolocation::{locate_with_timeout, GeolocationError, Geolocator, Position};
use crate::report::schema::{validate, FieldErrors, ReportField, ReportFormValues};
use crate::utils::timing::ActionTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Empty,
    ImageSelected,
    Analyzing,
    AnalysisFailed,
    ReportFormVisible,
    Submitting,
    SubmitSucceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    fn info(title: &str, description: impl Into<String>) -> Self {
        Notice {
            title: title.to_string(),
            description: description.into(),
            variant: NoticeVariant::Default,
        }
    }

    fn error(title: &str, description: impl Into<String>) -> Self {
        Notice {
            title: title.to_string(),
            description: description.into(),
            variant: NoticeVariant::Destructive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub declared_type: Option<String>,
    pub bytes: Vec<u8>,
    pub source: IntakeSource,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    pub description: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub comments: Option<String>,
    pub send_to_local_police: Option<bool>,
    pub send_to_city_hall: Option<bool>,
}

impl FieldPatch {
    fn apply(self, values: &mut ReportFormValues) {
        if let Some(description) = self.description {
            values.description = description;
        }
        if let Some(location) = self.location {
            values.location = location;
        }
        if let Some(email) = self.email {
            values.email = email;
        }
        if let Some(comments) = self.comments {
            values.comments = comments;
        }
        if let Some(flag) = self.send_to_local_police {
            values.send_to_local_police = flag;
        }
        if let Some(flag) = self.send_to_city_hall {
            values.send_to_city_hall = flag;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportState {
    pub generation: u64,
    pub image: Option<ImageFile>,
    pub preview: Option<Preview>,
    pub values: ReportFormValues,
    pub field_errors: FieldErrors,
    pub analysis_error: Option<String>,
    pub analysis_ready: bool,
    pub submit_attempted: bool,
    pub analyzing: bool,
    pub locating: bool,
    pub submitting: bool,
    pub submit_success: bool,
    pub notices: Vec<Notice>,
}

impl ReportState {
    pub fn phase(&self) -> Phase {
        if self.submit_success {
            Phase::SubmitSucceeded
        } else if self.submitting {
            Phase::Submitting
        } else if self.image.is_none() {
            Phase::Empty
        } else if self.analyzing {
            Phase::Analyzing
        } else if self.analysis_ready {
            Phase::ReportFormVisible
        } else if self.analysis_error.is_some() {
            Phase::AnalysisFailed
        } else {
            Phase::ImageSelected
        }
    }

    pub fn can_analyze(&self) -> bool {
        self.image.is_some() && !self.analysis_ready && !self.analyzing && !self.submit_success
    }

    pub fn form_visible(&self) -> bool {
        self.analysis_ready && !self.submit_success
    }

    pub fn can_submit(&self) -> bool {
        self.form_visible() && !self.submitting
    }

    pub fn can_locate(&self) -> bool {
        self.form_visible() && !self.locating
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn next_draft(&self) -> ReportState {
        ReportState {
            generation: self.generation + 1,
            notices: self.notices.clone(),
            ..ReportState::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    SelectFile(Upload),
    PreviewRendered {
        generation: u64,
        preview: Preview,
    },
    Analyze,
    AnalysisSucceeded {
        generation: u64,
        description: String,
    },
    AnalysisFailed {
        generation: u64,
        message: String,
    },
    EditFields(FieldPatch),
    Locate,
    LocationResolved {
        generation: u64,
        result: Result<Position, GeolocationError>,
    },
    Submit,
    DeliverySucceeded {
        generation: u64,
    },
    DeliveryFailed {
        generation: u64,
        message: String,
    },
    Reset,
}

impl Action {
    fn completion_generation(&self) -> Option<u64> {
        match self {
            Action::PreviewRendered { generation, .. }
            | Action::AnalysisSucceeded { generation, .. }
            | Action::AnalysisFailed { generation, .. }
            | Action::LocationResolved { generation, .. }
            | Action::DeliverySucceeded { generation }
            | Action::DeliveryFailed { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Action::SelectFile(_) => "select_file",
            Action::PreviewRendered { .. } => "preview_rendered",
            Action::Analyze => "analyze",
            Action::AnalysisSucceeded { .. } => "analysis_succeeded",
            Action::AnalysisFailed { .. } => "analysis_failed",
            Action::EditFields(_) => "edit_fields",
            Action::Locate => "locate",
            Action::LocationResolved { .. } => "location_resolved",
            Action::Submit => "submit",
            Action::DeliverySucceeded { .. } => "delivery_succeeded",
            Action::DeliveryFailed { .. } => "delivery_failed",
            Action::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Effect {
    RenderPreview { generation: u64, image: ImageFile },
    Describe { generation: u64, image: ImageFile },
    Locate { generation: u64 },
    Deliver { generation: u64, submission: Submission },
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: ReportState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: ReportState) -> Self {
        Transition {
            state,
            effect: None,
        }
    }

    fn with(state: ReportState, effect: Effect) -> Self {
        Transition {
            state,
            effect: Some(effect),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ControllerError {
    #[error("Please upload an image file.")]
    InvalidFileType {
        mime_type: String,
        intake: IntakeSource,
    },
    #[error("Cannot {action} while the report is {phase:?}")]
    Unavailable { action: &'static str, phase: Phase },
    #[error("{action} is already in progress")]
    InFlight { action: &'static str },
    #[error("The report has validation errors")]
    Invalid(FieldErrors),
}

impl ControllerError {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            ControllerError::InvalidFileType { .. } => {
                Some(Notice::error("Invalid File Type", "Please upload an image file."))
            }
            _ => None,
        }
    }
}

pub fn reduce(state: &ReportState, action: Action) -> Result<Transition, ControllerError> {
    if let Some(generation) = action.completion_generation() {
        if !state.is_current(generation) {
            debug!(
                "Discarding stale {} (generation {} != {})",
                action.label(),
                generation,
                state.generation
            );
            return Ok(Transition::to(state.clone()));
        }
    }

    match action {
        Action::SelectFile(upload) => {
            let image = ImageFile::from_upload(
                upload.name,
                upload.declared_type.as_deref(),
                upload.bytes,
            )
            .map_err(|mime_type| ControllerError::InvalidFileType {
                mime_type,
                intake: upload.source,
            })?;
            let mut next = state.next_draft();
            next.image = Some(image.clone());
            let generation = next.generation;
            Ok(Transition::with(
                next,
                Effect::RenderPreview { generation, image },
            ))
        }
        Action::PreviewRendered { preview, .. } => {
            let mut next = state.clone();
            next.preview = Some(preview);
            Ok(Transition::to(next))
        }
        Action::Analyze => {
            if state.analyzing {
                return Err(ControllerError::InFlight { action: "analyze" });
            }
            let Some(image) = state.image.clone().filter(|_| state.can_analyze()) else {
                return Err(ControllerError::Unavailable {
                    action: "analyze",
                    phase: state.phase(),
                });
            };
            let mut next = state.clone();
            next.analyzing = true;
            next.analysis_error = None;
            next.values.description.clear();
            Ok(Transition::with(
                next,
                Effect::Describe {
                    generation: state.generation,
                    image,
                },
            ))
        }
        Action::AnalysisSucceeded { description, .. } if description.trim().is_empty() => {
            reduce(
                state,
                Action::AnalysisFailed {
                    generation: state.generation,
                    message: "AI did not return a description.".to_string(),
                },
            )
        }
        Action::AnalysisSucceeded { description, .. } => {
            let mut next = state.clone();
            next.analyzing = false;
            next.analysis_ready = true;
            next.analysis_error = None;
            next.values.description = description;
            next.notices.push(Notice::info(
                "Analysis Complete",
                "Image description generated.",
            ));
            Ok(Transition::to(next))
        }
        Action::AnalysisFailed { message, .. } => {
            let mut next = state.clone();
            next.analyzing = false;
            next.analysis_error = Some(format!("Failed to analyze image: {message}"));
            next.notices.push(Notice::error("Analysis Failed", message));
            Ok(Transition::to(next))
        }
        Action::EditFields(patch) => {
            if !state.form_visible() {
                return Err(ControllerError::Unavailable {
                    action: "edit the report",
                    phase: state.phase(),
                });
            }
            let mut next = state.clone();
            patch.apply(&mut next.values);
            if next.submit_attempted {
                next.field_errors = validate(&next.values).err().unwrap_or_default();
            }
            Ok(Transition::to(next))
        }
        Action::Locate => {
            if state.locating {
                return Err(ControllerError::InFlight { action: "locate" });
            }
            if !state.can_locate() {
                return Err(ControllerError::Unavailable {
                    action: "look up the location",
                    phase: state.phase(),
                });
            }
            let mut next = state.clone();
            next.locating = true;
            Ok(Transition::with(
                next,
                Effect::Locate {
                    generation: state.generation,
                },
            ))
        }
        Action::LocationResolved { result, .. } => {
            let mut next = state.clone();
            next.locating = false;
            match result {
                Ok(position) => {
                    let location = position.to_location_string();
                    next.values.location = location.clone();
                    next.field_errors.refresh(&next.values, ReportField::Location);
                    next.notices.push(Notice::info(
                        "Location Fetched",
                        format!("Coordinates: {location}"),
                    ));
                }
                Err(err) => {
                    next.notices
                        .push(Notice::error(err.notice_title(), err.to_string()));
                }
            }
            Ok(Transition::to(next))
        }
        Action::Submit => {
            if state.submitting {
                return Err(ControllerError::InFlight { action: "submit" });
            }
            if !state.can_submit() {
                return Err(ControllerError::Unavailable {
                    action: "submit",
                    phase: state.phase(),
                });
            }
            let mut next = state.clone();
            next.submit_attempted = true;
            match validate(&next.values) {
                Err(errors) => {
                    next.field_errors = errors;
                    Ok(Transition::to(next))
                }
                Ok(report) => {
                    next.field_errors.clear();
                    next.submitting = true;
                    let submission = Submission {
                        image: state.image.as_ref().map(|image| image.name.clone()),
                        report,
                    };
                    Ok(Transition::with(
                        next,
                        Effect::Deliver {
                            generation: state.generation,
                            submission,
                        },
                    ))
                }
            }
        }
        Action::DeliverySucceeded { .. } => {
            let mut next = state.clone();
            next.submitting = false;
            next.submit_success = true;
            next.notices.push(Notice::info(
                "Report Submitted!",
                "Your urban issue report has been notionally sent.",
            ));
            Ok(Transition::to(next))
        }
        Action::DeliveryFailed { message, .. } => {
            let mut next = state.clone();
            next.submitting = false;
            next.notices.push(Notice::error("Report Failed", message));
            Ok(Transition::to(next))
        }
        Action::Reset => {
            if !state.submit_success {
                return Err(ControllerError::Unavailable {
                    action: "start a new report",
                    phase: state.phase(),
                });
            }
            Ok(Transition::to(state.next_draft()))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    pub phase: Phase,
    pub generation: u64,
    pub image_name: Option<String>,
    pub preview: Option<Preview>,
    pub values: ReportFormValues,
    pub field_errors: FieldErrors,
    pub analysis_error: Option<String>,
    pub can_analyze: bool,
    pub can_submit: bool,
    pub is_analyzing: bool,
    pub is_locating: bool,
    pub is_submitting: bool,
    pub submit_success: bool,
    pub notices: Vec<Notice>,
}

impl ReportView {
    fn from_state(state: &ReportState, notices: Vec<Notice>) -> Self {
        ReportView {
            phase: state.phase(),
            generation: state.generation,
            image_name: state.image.as_ref().map(|image| image.name.clone()),
            preview: state.preview.clone(),
            values: state.values.clone(),
            field_errors: state.field_errors.clone(),
            analysis_error: state.analysis_error.clone(),
            can_analyze: state.can_analyze(),
            can_submit: state.can_submit(),
            is_analyzing: state.analyzing,
            is_locating: state.locating,
            is_submitting: state.submitting,
            submit_success: state.submit_success,
            notices,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub location_timeout: Duration,
}

pub struct ReportController {
    id: Uuid,
    state: Mutex<ReportState>,
    last_active: Mutex<Instant>,
    describer: Arc<dyn ImageDescriber>,
    sink: Arc<dyn ReportSink>,
    settings: ControllerSettings,
}

/// Completion owed by an in-flight effect. If the awaiting future is dropped
/// first, the fallback action is dispatched so the draft never stays busy.
struct Pending<'a> {
    controller: &'a ReportController,
    fallback: Option<Action>,
}

impl<'a> Pending<'a> {
    fn new(controller: &'a ReportController, fallback: Action) -> Self {
        Pending {
            controller,
            fallback: Some(fallback),
        }
    }

    fn settle(mut self, action: Action) -> Result<(), ControllerError> {
        self.fallback = None;
        self.controller.dispatch(action).map(|_| ())
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let Some(action) = self.fallback.take() else {
            return;
        };
        warn!(
            "Session {} dropped an in-flight effect; settling with {}",
            self.controller.id,
            action.label()
        );
        if let Err(err) = self.controller.dispatch(action) {
            warn!(
                "Session {} could not settle a dropped effect: {}",
                self.controller.id, err
            );
        }
    }
}

impl ReportController {
    pub fn new(
        id: Uuid,
        describer: Arc<dyn ImageDescriber>,
        sink: Arc<dyn ReportSink>,
        settings: ControllerSettings,
    ) -> Self {
        ReportController {
            id,
            state: Mutex::new(ReportState::default()),
            last_active: Mutex::new(Instant::now()),
            describer,
            sink,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub fn is_busy(&self) -> bool {
        let state = self.state.lock();
        state.analyzing || state.locating || state.submitting
    }

    fn dispatch(&self, action: Action) -> Result<Option<Effect>, ControllerError> {
        *self.last_active.lock() = Instant::now();
        let mut state = self.state.lock();
        let Transition { state: next, effect } = reduce(&state, action)?;
        *state = next;
        Ok(effect)
    }

    pub fn snapshot(&self) -> ReportView {
        let mut state = self.state.lock();
        let notices = std::mem::take(&mut state.notices);
        ReportView::from_state(&state, notices)
    }

    #[cfg(test)]
    pub fn state(&self) -> ReportState {
        self.state.lock().clone()
    }

    pub async fn select_file(&self, upload: Upload) -> Result<ReportView, ControllerError> {
        let source = upload.source;
        let name = upload.name.clone();
        let effect = self.dispatch(Action::SelectFile(upload)).map_err(|err| {
            if let ControllerError::InvalidFileType { mime_type, .. } = &err {
                info!(
                    "Session {} rejected {} from {}: type {:?}",
                    self.id,
                    name,
                    source.as_str(),
                    mime_type
                );
            }
            err
        })?;

        if let Some(Effect::RenderPreview { generation, image }) = effect {
            info!(
                "Session {} selected {} ({}, {} bytes) via {}",
                self.id,
                image.name,
                image.mime_type,
                image.size(),
                source.as_str()
            );
            let rendered = tokio::task::spawn_blocking(move || render_preview(&image)).await;
            match rendered {
                Ok(preview) => {
                    self.dispatch(Action::PreviewRendered {
                        generation,
                        preview,
                    })?;
                }
                Err(err) => warn!("Preview rendering for session {} failed: {}", self.id, err),
            }
        }
        Ok(self.snapshot())
    }

    pub async fn analyze(&self) -> Result<ReportView, ControllerError> {
        let effect = self.dispatch(Action::Analyze)?;
        if let Some(Effect::Describe { generation, image }) = effect {
            let pending = Pending::new(
                self,
                Action::AnalysisFailed {
                    generation,
                    message: "the request was cancelled before the AI answered".to_string(),
                },
            );
            let mut timer = ActionTimer::start("analyze", &self.id.to_string(), generation);
            let input = DescribeImageInput {
                photo_data_uri: image.to_data_uri(),
            };
            let action = match self.describer.describe(&input).await {
                Ok(result) => {
                    timer.complete("success", None);
                    Action::AnalysisSucceeded {
                        generation,
                        description: result.description,
                    }
                }
                Err(err) => {
                    warn!(
                        "Image analysis for session {} via {} failed: {}",
                        self.id,
                        self.describer.model_label(),
                        err
                    );
                    timer.complete("error", Some(err.to_string()));
                    Action::AnalysisFailed {
                        generation,
                        message: err.to_string(),
                    }
                }
            };
            pending.settle(action)?;
        }
        Ok(self.snapshot())
    }

    pub fn edit(&self, patch: FieldPatch) -> Result<ReportView, ControllerError> {
        self.dispatch(Action::EditFields(patch))?;
        Ok(self.snapshot())
    }

    pub async fn locate(&self, geolocator: &dyn Geolocator) -> Result<ReportView, ControllerError> {
        let effect = self.dispatch(Action::Locate)?;
        if let Some(Effect::Locate { generation }) = effect {
            let pending = Pending::new(
                self,
                Action::LocationResolved {
                    generation,
                    result: Err(GeolocationError::PositionUnavailable),
                },
            );
            let mut timer = ActionTimer::start("locate", &self.id.to_string(), generation);
            let result = locate_with_timeout(geolocator, self.settings.location_timeout).await;
            match &result {
                Ok(_) => timer.complete("success", None),
                Err(err) => timer.complete("error", Some(format!("{err:?}"))),
            }
            pending.settle(Action::LocationResolved { generation, result })?;
        }
        Ok(self.snapshot())
    }

    pub async fn submit(&self) -> Result<ReportView, ControllerError> {
        let effect = self.dispatch(Action::Submit)?;
        let Some(Effect::Deliver {
            generation,
            submission,
        }) = effect
        else {
            let errors = self.state.lock().field_errors.clone();
            return Err(ControllerError::Invalid(errors));
        };

        let pending = Pending::new(
            self,
            Action::DeliveryFailed {
                generation,
                message: "the request was cancelled before delivery finished".to_string(),
            },
        );
        let mut timer = ActionTimer::start("submit", &self.id.to_string(), generation);
        let action = match self.sink.deliver(&submission).await {
            Ok(receipt) => {
                info!(
                    "Session {} delivered report {} to {:?}",
                    self.id, receipt.reference, receipt.recipients
                );
                timer.complete("success", Some(receipt.reference.to_string()));
                Action::DeliverySucceeded { generation }
            }
            Err(err) => {
                warn!("Report delivery for session {} failed: {}", self.id, err);
                timer.complete("error", Some(err.to_string()));
                Action::DeliveryFailed {
                    generation,
                    message: err.to_string(),
                }
            }
        };
        pending.settle(action)?;
        Ok(self.snapshot())
    }

    pub fn reset(&self) -> Result<ReportView, ControllerError> {
        self.dispatch(Action::Reset)?;
        Ok(self.snapshot())
    }
}
