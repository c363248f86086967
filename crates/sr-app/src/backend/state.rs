use sr_core::Coordinator;

pub struct AppState {
    coordinator: Coordinator,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
