pub mod events;

pub use events::FulfillmentEvent;
