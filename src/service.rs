use tide::http::headers::HeaderValue;
use tide::security::{CorsMiddleware, Origin};
use tide::StatusCode;

use crate::accounts;
use crate::context::Context;
use crate::oauth::{self, CallbackParams};
use crate::schema::{self, MusikSchema};
use crate::{Error, Result, LOG};

/// Build a json response, optionally with a status
macro_rules! resp {
    (json => $body:expr) => {{
        resp!(status => tide::StatusCode::Ok, json => $body)
    }};
    (status => $status:expr, json => $body:expr) => {{
        let mut r = tide::Response::new($status);
        r.set_body(tide::Body::from_json(&$body)?);
        r
    }};
}

#[derive(Clone)]
pub struct State {
    ctx: Context,
    schema: MusikSchema,
}

impl State {
    pub fn new(ctx: Context) -> Self {
        let schema = schema::build(ctx.clone());
        Self { ctx, schema }
    }
}

fn cors(origins: &[String]) -> Result<CorsMiddleware> {
    let methods: HeaderValue = "GET, POST, OPTIONS"
        .parse()
        .map_err(|e| Error::Config(format!("invalid cors methods {}", e)))?;
    let headers: HeaderValue = "Authorization, Content-Type"
        .parse()
        .map_err(|e| Error::Config(format!("invalid cors headers {}", e)))?;
    Ok(CorsMiddleware::new()
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_origin(Origin::from(origins.to_vec()))
        .allow_credentials(false))
}

pub fn app(ctx: Context) -> Result<tide::Server<State>> {
    let graphiql = ctx.config.graphiql;
    let cors = cors(&ctx.config.allowed_origins)?;
    let mut app = tide::with_state(State::new(ctx));
    app.with(crate::logging::LogMiddleware::new());
    app.with(cors);
    app.at("/status").get(status);
    app.at("/callback").get(callback);
    app.at("/graphql").post(graphql);
    if graphiql {
        app.at("/graphql").get(graphiql_page);
    }
    Ok(app)
}

pub async fn start(ctx: Context) -> Result<()> {
    let addr = ctx.config.listen_addr();
    slog::info!(LOG, "running at {}", ctx.config.host());
    app(ctx)?
        .listen(addr)
        .await
        .map_err(|e| crate::se!("server error {}", e))?;
    Ok(())
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: tide::Request<State>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().ctx.config.version,
    }))
}

/// Spotify redirects here after the user granted (or refused) access.
/// The query carries the one-time code and is never logged.
async fn callback(req: tide::Request<State>) -> tide::Result {
    let params: CallbackParams = req.query().unwrap_or_default();
    let ctx = &req.state().ctx;
    match oauth::handle_callback(ctx, params).await {
        Ok(account_id) => {
            slog::info!(LOG, "oauth callback complete"; "account_id" => account_id);
            Ok(tide::Redirect::new(&ctx.config.frontend_redirect_uri).into())
        }
        Err(e) => {
            let status = match e {
                Error::Callback(_) => StatusCode::BadRequest,
                Error::Upstream { .. } | Error::Http(_) => StatusCode::BadGateway,
                _ => StatusCode::InternalServerError,
            };
            slog::error!(
                LOG, "oauth callback failed";
                "status" => status as u16,
                "error" => %e,
            );
            let message = if status == StatusCode::InternalServerError {
                "internal server error".to_string()
            } else {
                e.to_string()
            };
            Ok(resp!(status => status, json => serde_json::json!({ "error": message })))
        }
    }
}

async fn graphql(req: tide::Request<State>) -> tide::Result {
    let state = req.state().clone();
    let token = req
        .header("Authorization")
        .and_then(|values| accounts::bearer_token(values.last().as_str()).map(String::from));
    let mut gql_req = async_graphql_tide::receive_request(req).await?;
    if let Some(token) = token {
        match accounts::authenticate(&state.ctx, &token).await {
            Ok(Some(viewer)) => gql_req = gql_req.data(viewer),
            Ok(None) => slog::debug!(LOG, "unknown or expired access token"),
            Err(e) => return Err(tide::Error::from_str(StatusCode::InternalServerError, e.to_string())),
        }
    }
    async_graphql_tide::respond(state.schema.execute(gql_req).await)
}

async fn graphiql_page(_req: tide::Request<State>) -> tide::Result {
    let body = async_graphql::http::GraphiQLSource::build()
        .endpoint("/graphql")
        .finish();
    let mut r = tide::Response::new(StatusCode::Ok);
    r.set_body(body);
    r.set_content_type(tide::http::mime::HTML);
    Ok(r)
}
