pub mod draft;
pub mod geo;
pub mod images;
pub mod rules;
pub mod service;
pub mod submission;
pub mod wizard;

pub use draft::FieldUpdate;
pub use images::{ImageIngestionPipeline, ImageSet, SelectedFile};
pub use rules::ListingRules;
pub use service::{HttpProductService, ProductService};
pub use submission::{SubmissionError, SubmissionPipeline, SubmissionReceipt};
pub use wizard::{WizardStateMachine, WizardStep};
