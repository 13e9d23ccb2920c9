//! HTTP boundary. Serves the control API and the local image directory; all
//! device work goes through the shared controller handed in as app data.

pub mod api;

use std::sync::Arc;

use actix_files::Files;
use actix_web::{App, HttpServer, web::Data};
use tracing::info;

use crate::config::Config;
use crate::control::HybridController;

pub async fn serve(config: Config, controller: Arc<HybridController>) -> std::io::Result<()> {
    let bind_addr = config.bind_addr.clone();
    info!(bind = %bind_addr, images = %config.image_dir, "starting web server");

    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(controller.clone()))
            .app_data(Data::new(config.clone()))
            .service(api::list_images)
            .service(api::upload_image)
            .service(api::send_to_device)
            .service(api::set_image)
            .service(api::current_image)
            .service(api::device_status)
            .service(api::search_photos)
            .service(api::featured_photos)
            .service(api::debug_status)
            .service(api::debug_uploads)
            .service(api::debug_identity)
            .service(api::debug_reset_identity)
            .service(api::debug_send_key)
            .service(Files::new("/images", config.image_dir.clone()))
    })
    .bind(bind_addr)?
    .run()
    .await
}
