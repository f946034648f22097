use super::events::Event;

/// Observer for progress events emitted while a backup run executes.
pub trait Reporter {
    /// Receive a structured event.
    fn report(&mut self, event: Event);
}

impl Reporter for () {
    fn report(&mut self, _event: Event) {}
}

impl Reporter for Vec<Event> {
    fn report(&mut self, event: Event) {
        self.push(event);
    }
}
