// Lock-free communication channels

use crate::messaging::notification::Notification;
use crate::midi::event::OutputEvent;
use ringbuf::{HeapRb, traits::Split};

pub type OutputProducer = ringbuf::HeapProd<OutputEvent>;
pub type OutputConsumer = ringbuf::HeapCons<OutputEvent>;

/// Channel carrying events from the playback clock to the MIDI output thread
pub fn create_output_channel(capacity: usize) -> (OutputProducer, OutputConsumer) {
    let rb = HeapRb::<OutputEvent>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

/// Channel carrying notifications from the engine to the display layer
pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}
