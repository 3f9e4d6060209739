use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::judge::Judge;
use crate::routes::{health_handler, json_error_handler, post_run_handler};

pub fn build_server(server_config: ServerConfig, judge: Judge) -> std::io::Result<Server> {
    let judge = web::Data::new(judge);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(judge.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_run_handler)
            .service(health_handler)
    })
    .bind((server_config.bind_address.clone(), server_config.bind_port))?
    .run();

    log::info!(
        "Listening on {}:{}",
        server_config.bind_address,
        server_config.bind_port
    );
    Ok(server)
}
