//! Campaigns: data model and lifecycle management.

pub mod manager;
pub mod model;

pub use manager::CampaignManager;
pub use model::{
    Campaign, CampaignDetail, CampaignFilter, CampaignPage, CampaignStats, CampaignStatus,
    CampaignSummary, CreatedCampaign, DEFAULT_DAY_OFFSETS, DeliveryState, Enrollment, NewCampaign,
    TouchDelivery, TouchTemplate, default_sequence,
};
