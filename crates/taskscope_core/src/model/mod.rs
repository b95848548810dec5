mod normalize;
mod task;

pub use normalize::{extract_list, map_status, normalize_task, person_name, value_text};
pub use task::{StatusUi, Task};
