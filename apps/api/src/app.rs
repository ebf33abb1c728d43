use crate::{
    config::Config,
    error::Result,
    handlers::not_found,
    routes,
    services::{open_vector_index, GeminiClient, PipelineSettings, RecommendationService},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use std::{net::TcpListener, sync::Arc};

pub struct Application {
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        let bind_address = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}", bind_address);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    /// This is useful for testing where we want to use a random port
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        // Collaborators are opened once here and shared read-only by all workers
        let recommendation_service = web::Data::new(build_recommendation_service(&self.config)?);

        let mut server = HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(recommendation_service.clone())
                .configure(routes::configure)
                .default_service(web::to(not_found))
        });

        if let Some(workers) = self.config.workers {
            info!("Using {} worker threads", workers);
            server = server.workers(workers);
        }

        server.listen(listener)?.run().await?;

        Ok(())
    }
}

/// Wire the configured collaborators into a [`RecommendationService`].
pub fn build_recommendation_service(config: &Config) -> Result<RecommendationService> {
    let gemini = Arc::new(GeminiClient::new(config)?);
    let index = open_vector_index(config)?;
    info!(
        "Recommendation pipeline ready (generation model {}, embedding model {})",
        config.generation_model, config.embedding_model
    );

    Ok(RecommendationService::new(
        PipelineSettings::from(config),
        gemini.clone(),
        index,
        gemini,
    ))
}
