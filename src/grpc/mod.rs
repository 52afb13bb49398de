pub mod calculation_service;
pub mod management_service;
pub mod server;

pub use calculation_service::CalculationService;
pub use management_service::ManagementService;
pub use server::RpcServer;
