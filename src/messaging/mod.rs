// Engine -> outside world messaging

pub mod channels;
pub mod notification;

pub use channels::{
    NotificationConsumer, NotificationProducer, OutputConsumer, OutputProducer,
    create_notification_channel, create_output_channel,
};
pub use notification::{Notification, NotificationCategory, NotificationLevel};
