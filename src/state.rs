use crate::alerts::AlertStatus;
use crate::commands::CommandService;
use crate::delivery::DeliveryStatus;

use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState<T, W> {
    pub commands: CommandService<T, W>,
    pub delivery_status: watch::Receiver<DeliveryStatus>,
    pub alert_status: watch::Receiver<AlertStatus>,
}
