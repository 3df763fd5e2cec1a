//! HTTP and WebSocket route tree

use log::info;
use std::convert::Infallible;
use warp::{self, Filter};

use crate::constants::{HEALTH_PATH, ROOMS_PATH, WS_PATH};
use crate::core::session::SharedSessionManager;
use crate::handlers::websocket::handle_ws_client;

/// `GET /ws` (WebSocket), `GET /health` and `GET /rooms`, with permissive CORS
pub fn routes(
    manager: SharedSessionManager,
    max_message_size: usize,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_route = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_manager(manager.clone()))
        .map(move |ws: warp::ws::Ws, manager: SharedSessionManager| {
            info!("New websocket connection");
            ws.on_upgrade(move |socket| handle_ws_client(socket, manager, max_message_size))
        });

    let health_route = warp::path(HEALTH_PATH)
        .and(warp::path::end())
        .map(|| "OK");

    let rooms_route = warp::path(ROOMS_PATH)
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(list_rooms);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET"]);

    ws_route.or(health_route).or(rooms_route).with(cors)
}

async fn list_rooms(manager: SharedSessionManager) -> Result<impl warp::Reply, Infallible> {
    let rooms = manager.registry().rooms().await;
    Ok(warp::reply::json(&rooms))
}

// Helper function to include the session manager in a request
fn with_manager(
    manager: SharedSessionManager,
) -> impl Filter<Extract = (SharedSessionManager,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}
