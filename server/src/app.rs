//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME, APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::SpanStoreService;
use crate::data::benefit::{BenefitService, CachedBenefitService, StaticBenefitService};
use crate::data::cache::CacheService;
use crate::data::files::{FileUrlSigner, NoopUrlSigner, S3UrlSigner};
use crate::data::topics::{PublishOptions, TopicService};
use crate::domain::platform::PlatformFilterFactory;
use crate::domain::processor::ProcessorFactory;
use crate::domain::tenant::{ConfigTenantProvider, TenantProvider};
use crate::domain::{
    AnnotationService, IdGenerator, IngestService, SpanPersistConsumer, TraceData, TraceProducer,
    TraceQueryService,
};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub cache: Arc<CacheService>,
    /// Not used by the services below; exposed for embedders that allocate
    /// span or entity ids against the shared counter store
    pub ids: Arc<IdGenerator>,
    pub store: SpanStoreService,
    pub topics: Arc<TopicService>,
    pub ingest: Arc<IngestService>,
    pub query: Arc<TraceQueryService>,
    pub annotations: Arc<AnnotationService>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::CheckConfig) => Self::check_config(&cli_config),
            Some(Commands::Start) | None => {
                let app = Self::init(&cli_config).await?;
                Self::start_service(app).await
            }
        }
    }

    /// Connect every backend and wire the domain services
    pub async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let ids = Arc::new(
            IdGenerator::new(
                cache.clone(),
                config.id_generator.namespace.clone(),
                config.id_generator.server_ids.clone(),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize id generator: {}", e))?,
        );

        let store = SpanStoreService::init(
            config.store,
            &config.clickhouse,
            &config.tenant_cfg.all_span_tables(),
            &config.tenant_cfg.all_annotation_tables(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize span store: {}", e))?;
        tracing::debug!(backend = %store.backend(), "Span store initialized");

        let topics = Arc::new(
            TopicService::from_config(&config.mq)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize topic service: {}", e))?,
        );
        tracing::debug!(backend = topics.backend_name(), "Topics initialized");

        let producer = Arc::new(TraceProducer::new(
            topics.stream_topic::<TraceData>(&config.mq.topic),
            PublishOptions::from(&config.mq),
            config.mq.max_buffer_bytes,
        ));
        let tenants: Arc<dyn TenantProvider> =
            Arc::new(ConfigTenantProvider::new(config.platform_tenants.clone()));
        let ingest = Arc::new(IngestService::new(producer.clone(), tenants.clone()));

        let signer: Arc<dyn FileUrlSigner> = match &config.tos {
            Some(tos) => Arc::new(
                S3UrlSigner::new(tos)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to initialize URL signer: {}", e))?,
            ),
            None => Arc::new(NoopUrlSigner),
        };
        tracing::debug!(signer = signer.signer_name(), "URL signer initialized");

        let benefit: Arc<dyn BenefitService> = Arc::new(CachedBenefitService::new(
            Arc::new(StaticBenefitService::new(&config.benefit)),
            cache.clone(),
            Duration::from_secs(config.benefit.cache_ttl_s),
        ));

        let tenant_cfg = Arc::new(config.tenant_cfg.clone());
        let annotations = Arc::new(AnnotationService::new(
            store.repository(),
            tenants.clone(),
            tenant_cfg.clone(),
        ));

        let platform_cfg = Arc::new(config.platform_cfg.clone());
        let processors = Arc::new(ProcessorFactory::new(benefit, signer, platform_cfg.clone()));
        let query = Arc::new(TraceQueryService::new(
            store.repository(),
            tenants,
            tenant_cfg,
            Arc::new(PlatformFilterFactory::new(&platform_cfg)),
            processors,
            Arc::new(config.field_meta.clone()),
        ));

        let shutdown = ShutdownService::new(producer);

        Ok(Self {
            shutdown,
            config,
            cache,
            ids,
            store,
            topics,
            ingest,
            query,
            annotations,
        })
    }

    fn check_config(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;

        println!("{} configuration is valid", APP_NAME);
        println!("  store:          {}", config.store);
        println!("  cache:          {}", config.cache.backend);
        println!(
            "  queue:          {} ({})",
            config.mq.topic,
            if config.mq.addr.is_empty() {
                "in-process"
            } else {
                "redis"
            }
        );
        println!("  ingest tenant:  {}", config.platform_tenants.default_ingest_tenant);
        println!(
            "  span tables:    {}",
            config.tenant_cfg.all_span_tables().join(", ")
        );
        println!(
            "  object storage: {}",
            config
                .tos
                .as_ref()
                .map(|t| t.bucket.as_str())
                .unwrap_or("disabled")
        );
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_service(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        tracing::info!(
            store = %app.store.backend(),
            queue = app.topics.backend_name(),
            topic = %app.config.mq.topic,
            "{} started",
            APP_NAME
        );

        app.shutdown.wait().await;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        if let Some(h) = self.store.start_health_check_task(self.shutdown.subscribe()) {
            self.shutdown.register(h).await;
        }

        let traces_topic = self.topics.stream_topic::<TraceData>(&self.config.mq.topic);
        let consumer = SpanPersistConsumer::new(
            self.store.repository(),
            Arc::new(self.config.tenant_cfg.clone()),
            &self.config.mq.producer_group,
        );

        self.shutdown
            .register(consumer.start(traces_topic, self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
    }
}
