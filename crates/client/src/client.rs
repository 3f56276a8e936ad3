use std::path::Path;
use std::sync::Arc;

use aurora_device::{DeviceApi, DeviceChannel, DeviceLocator, TcpChannel};
use aurora_map_sync::{
    CacheSnapshot, FetchOptions, MapData, MapDataCache, MapQuery, MapSelector, QueryError,
    SyncError, SyncStatus, SyncTracker,
};
use aurora_map_transfer::{MapStorage, TransferError, TransferEvent, TransferReport};
use aurora_stream::{ImuSource, LidarSource, SamplePoller, StreamError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ClientError;
use crate::config::ClientConfig;

/// All components bound to one device channel.
pub struct AuroraClient {
    config: ClientConfig,
    api: DeviceApi,
    tcp: Option<Arc<TcpChannel>>,
    storage: MapStorage,
    tracker: SyncTracker,
    query: MapQuery,
    cache: MapDataCache,
}

impl AuroraClient {
    /// Opens a TCP channel to `locator` using the connection settings from
    /// `config`.
    pub async fn connect(
        locator: &DeviceLocator,
        config: ClientConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let channel =
            Arc::new(TcpChannel::connect(locator, config.connection.channel_options(), cancel).await?);
        let mut client = Self::build(channel.clone(), config);
        client.tcp = Some(channel);
        Ok(client)
    }

    /// Uses an existing channel, e.g. a simulated device.
    pub fn from_channel(
        channel: Arc<dyn DeviceChannel>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self::build(channel, config))
    }

    fn build(channel: Arc<dyn DeviceChannel>, config: ClientConfig) -> Self {
        let api = DeviceApi::new(channel);
        info!(device = %api.device_id(), "aurora client ready");
        Self {
            storage: MapStorage::new(api.clone()),
            tracker: SyncTracker::new(api.clone(), config.sync.poll_interval()),
            query: MapQuery::new(api.clone()),
            cache: MapDataCache::new(),
            tcp: None,
            api,
            config,
        }
    }

    pub fn device_id(&self) -> &str {
        self.api.device_id()
    }

    pub fn is_connected(&self) -> bool {
        self.api.is_connected()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &DeviceApi {
        &self.api
    }

    pub fn map_storage(&self) -> &MapStorage {
        &self.storage
    }

    pub fn sync_tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn map_query(&self) -> &MapQuery {
        &self.query
    }

    pub fn cache(&self) -> &MapDataCache {
        &self.cache
    }

    /// Downloads the device's maps into `path` and waits for the result.
    pub async fn download_map(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport, TransferError> {
        self.storage
            .download_map(path, self.config.transfer.monitor_options(), cancel, events)
            .await
    }

    /// Uploads the map file at `path` and waits for the result.
    pub async fn upload_map(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport, TransferError> {
        self.storage
            .upload_map(path, self.config.transfer.monitor_options(), cancel, events)
            .await
    }

    /// Waits until map data is synced per the configured criteria.
    pub async fn wait_for_map_data<F>(&self, progress: F) -> Result<SyncStatus, SyncError>
    where
        F: FnMut(std::time::Duration, &SyncStatus),
    {
        self.tracker
            .wait_for_map_data(self.config.sync.criteria(), progress)
            .await
    }

    pub async fn get_map_data(
        &self,
        selector: impl Into<MapSelector>,
        options: FetchOptions,
    ) -> Result<MapData, QueryError> {
        self.query.get_map_data(selector, options).await
    }

    /// Fetches into the client's cache and returns the new snapshot.
    pub async fn refresh_cache(
        &self,
        selector: impl Into<MapSelector>,
        options: FetchOptions,
    ) -> Result<Arc<CacheSnapshot>, QueryError> {
        self.query.fetch_into(&self.cache, selector, options).await
    }

    pub fn imu_poller(&self) -> Result<SamplePoller<ImuSource>, StreamError> {
        SamplePoller::new(
            ImuSource::new(self.api.clone()),
            self.config.stream.poller_options(),
        )
    }

    pub fn lidar_poller(&self) -> Result<SamplePoller<LidarSource>, StreamError> {
        SamplePoller::new(
            LidarSource::new(self.api.clone()),
            self.config.stream.poller_options(),
        )
    }

    /// Closes the TCP channel, if this client opened one.
    pub async fn disconnect(&self) {
        if let Some(tcp) = &self.tcp {
            tcp.disconnect().await;
        }
    }
}
