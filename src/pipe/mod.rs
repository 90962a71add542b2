mod client;
mod frame;
mod name;
mod pool;
mod server;

pub use client::PipeClient;
pub use frame::{encode_frame, ServicePipe, HEADER_UNITS, MAX_MESSAGE_UNITS};
pub use name::{is_redirect_guid, new_redirect_guid, redirect_name, well_known_name};
pub use pool::{WorkerPermit, WorkerPool};
pub use server::{PipeServer, RequestHandler};
