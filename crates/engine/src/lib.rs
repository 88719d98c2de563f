pub mod delivery;
pub mod events;
pub mod lookup;
pub mod medium;
pub mod ports;
pub mod reject;
pub mod schedule;
pub mod slot;

#[cfg(test)]
mod testing;

pub use delivery::{DeliverArticlesPayload, DeliveryOptions, build_deliver_articles_payload};
pub use events::MessageBrokerEventsService;
pub use lookup::{CredentialCipher, RequestLookupDetails, RequestLookupResolver};
pub use ports::{Entitlements, FeedLimitEnforcer, FeedRepository, LookupKeySync, NotificationSender};
pub use schedule::{MaintenanceSummary, ScheduleHandler, ScheduleSettings};
pub use slot::{SlotWindow, calculate_current_slot_window, calculate_slot_offset_ms};
