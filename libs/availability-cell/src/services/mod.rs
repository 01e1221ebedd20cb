pub mod acceptance;
pub mod materializer;
pub mod open_slots;
pub mod rules;
pub mod windows;

pub use acceptance::AcceptanceWorkflow;
pub use materializer::SlotMaterializer;
pub use open_slots::OpenSlotService;
pub use windows::WindowService;
