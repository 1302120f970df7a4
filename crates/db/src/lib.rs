pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod retry;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    AccountRepository, QuotationRepository, RepositoryError, RfqRepository, SalesLeadRepository,
    SqlAccountRepository, SqlQuotationRepository, SqlRfqRepository, SqlSalesLeadRepository,
    SqlStageLogStore, SqlTechnicalRecommendationRepository, SqlWorkOrderRepository,
    SqlWorkQueueResolver, StageLogStore, TechnicalRecommendationRepository, WorkOrderRepository,
    WorkQueueResolver,
};
