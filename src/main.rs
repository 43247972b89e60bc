mod card;
mod config;
mod database;
mod fts_tree;
mod history;
mod model;
mod seed;
mod store;

use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::{error, middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use card::{Card, CardProps, ClickTarget, SIGNUP_PATH};
use config::Config;
use database::*;
use history::MemoryHistory;
use log::{debug, info};
use model::*;
use serde::Deserialize;
use std::collections::HashMap;
use store::{map_state_to_props, replay, ActionLog, AppState};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

/// Store contents for the signed-in user, or the signed-out state.
fn load_state(id: &Identity, db: &sled::Db) -> actix_web::Result<AppState> {
    let user_id = match id.identity().and_then(|identity| identity.parse::<u64>().ok()) {
        Some(user_id) => user_id,
        None => return Ok(AppState::default()),
    };
    match db
        .get_user(user_id)
        .map_err(|err| log_error(err, "Database error"))?
    {
        Some(user) => {
            let favorites = db
                .get_favorites(user_id)
                .map_err(|err| log_error(err, "Database error"))?;
            Ok(AppState { user, favorites })
        }
        None => {
            debug!("Session refers to missing user {}", user_id);
            id.forget();
            Ok(AppState::default())
        }
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}

/// The referring page as a path, if it is on this site.
fn local_referer(req: &HttpRequest) -> String {
    let referer = match req
        .headers()
        .get("referer")
        .and_then(|referer| referer.to_str().ok())
    {
        Some(referer) => referer,
        None => return "/".to_owned(),
    };
    if is_local_path(referer) {
        return referer.to_owned();
    }
    let info = req.connection_info();
    for scheme in &["http://", "https://"] {
        let path = referer
            .strip_prefix(*scheme)
            .and_then(|rest| rest.strip_prefix(info.host()));
        if let Some(path) = path {
            if is_local_path(path) {
                return path.to_owned();
            }
        }
    }
    debug!("Ignoring foreign referer {}", referer);
    "/".to_owned()
}

/// Path and query of a movie list, from which card toggle links are built.
struct ListPage {
    path: String,
    params: Vec<(String, String)>,
}

impl ListPage {
    fn from_request(req: &HttpRequest) -> ListPage {
        ListPage {
            path: req.path().to_owned(),
            params: serde_urlencoded::from_str(req.query_string()).unwrap_or_default(),
        }
    }

    fn open(&self) -> Option<u64> {
        self.params
            .iter()
            .find(|(key, _)| key == "open")
            .and_then(|(_, value)| value.parse().ok())
    }

    /// Same page with the card of `movie_id` opened, or closed if `is_open`.
    fn toggle_href(&self, movie_id: u64, is_open: bool) -> String {
        let mut params: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(key, _)| key != "open")
            .cloned()
            .collect();
        if !is_open {
            params.push(("open".to_owned(), movie_id.to_string()));
        }
        let query = serde_urlencoded::to_string(&params).unwrap_or_default();
        if query.is_empty() {
            format!("{}#movie-{}", self.path, movie_id)
        } else {
            format!("{}?{}#movie-{}", self.path, query, movie_id)
        }
    }
}

fn render_cards(
    tera: &tera::Tera,
    state: &AppState,
    movies: Vec<Movie>,
    page: &ListPage,
) -> actix_web::Result<Vec<String>> {
    let history = MemoryHistory::new();
    let log = ActionLog::new();
    let open = page.open();
    movies
        .into_iter()
        .map(|movie| {
            let movie_id = movie.movie_id;
            let props = CardProps::connect(movie, map_state_to_props(state), &log, &history);
            let mut card = Card::new(props);
            card.mount();
            if open == Some(movie_id) {
                card.click(ClickTarget::Article);
            }
            let href = page.toggle_href(movie_id, card.state().toggle_info);
            card.render(tera, &href)
                .map_err(|err| log_error(err, "Template error"))
        })
        .collect()
}

fn render_page(
    tera: &tera::Tera,
    template: &str,
    state: &AppState,
    mut ctx: tera::Context,
) -> actix_web::Result<HttpResponse> {
    ctx.insert("user", &state.user);
    let body = tera
        .render(template, &ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

fn movie_list(
    tera: &tera::Tera,
    state: &AppState,
    heading: &str,
    query: &str,
    movies: Vec<Movie>,
    page: &ListPage,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    ctx.insert("heading", heading);
    ctx.insert("query", query);
    ctx.insert("cards", &render_cards(tera, state, movies, page)?);
    render_page(tera, "index.html", state, ctx)
}

async fn index(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let state = load_state(&id, &db)?;
    let movies = db
        .movies()
        .map_err(|err| log_error(err, "Database error"))?;
    movie_list(&tera, &state, "", "", movies, &ListPage::from_request(&req))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search(
    req: HttpRequest,
    params: web::Query<SearchParams>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let state = load_state(&id, &db)?;
    let movies = db
        .search_movies(&params.q)
        .map_err(|err| log_error(err, "Database error"))?;
    let heading = format!("Results for \"{}\"", params.q);
    let page = ListPage::from_request(&req);
    movie_list(&tera, &state, &heading, &params.q, movies, &page)
}

async fn favorites(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let state = load_state(&id, &db)?;
    if !state.user.is_authenticated() {
        return Ok(redirect(SIGNUP_PATH));
    }
    let movies = state.favorites.clone();
    let page = ListPage::from_request(&req);
    movie_list(&tera, &state, "Favorites", "", movies, &page)
}

async fn toggle_favorite(
    req: HttpRequest,
    path: web::Path<u64>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let movie_id = path.into_inner();
    let state = load_state(&id, &db)?;
    let movie = db
        .get_movie(movie_id)
        .map_err(|err| log_error(err, "Database error"))?
        .ok_or_else(|| error::ErrorNotFound("No such movie"))?;

    let history = MemoryHistory::new();
    let log = ActionLog::new();
    let mut card = Card::new(CardProps::connect(
        movie,
        map_state_to_props(&state),
        &log,
        &history,
    ));
    card.mount();
    card.click(ClickTarget::FavoriteButton);

    if let Some(location) = history.location() {
        return Ok(redirect(&location));
    }
    let actions = log.actions();
    if !actions.is_empty() {
        // Replayed against the stored list so concurrent clicks are not lost.
        let user = &state.user;
        let favorites = db
            .update_favorites(user.id, |favorites| {
                let current = AppState {
                    user: user.clone(),
                    favorites,
                };
                replay(current, &actions).favorites
            })
            .map_err(|err| log_error(err, "Database error"))?;
        debug!("User {} now has {} favorites", user.id, favorites.len());
    }
    Ok(redirect(&local_referer(&req)))
}

fn flag_context(flags: &HashMap<String, String>, names: &[&str]) -> tera::Context {
    let mut ctx = tera::Context::new();
    for name in names {
        ctx.insert(*name, &flags.contains_key(*name));
    }
    ctx
}

async fn signup(
    flags: web::Query<HashMap<String, String>>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let state = load_state(&id, &db)?;
    let ctx = flag_context(&flags, &["email_taken"]);
    render_page(&tera, "signup.html", &state, ctx)
}

#[derive(Deserialize)]
struct SignupParams {
    name: String,
    email: String,
    password: String,
}

async fn signup_post(
    params: web::Form<SignupParams>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    let name = params.name.trim();
    if name.is_empty() || params.email.is_empty() {
        return Ok(redirect(SIGNUP_PATH));
    }
    let password_hash = bcrypt::hash(&params.password, bcrypt::DEFAULT_COST)
        .map_err(|err| log_error(err, "Hashing error"))?;
    let user = User {
        id: 0,
        name: Some(name.to_owned()),
        email: params.email,
        password_hash,
    };
    match db
        .add_user(&user)
        .map_err(|err| log_error(err, "Database error"))?
    {
        Some(user_id) => {
            info!("New user {}", user_id);
            id.remember(user_id.to_string());
            Ok(redirect("/"))
        }
        None => Ok(redirect("/signup?email_taken")),
    }
}

async fn login(
    flags: web::Query<HashMap<String, String>>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let state = load_state(&id, &db)?;
    let ctx = flag_context(&flags, &["wrong_password", "logout"]);
    render_page(&tera, "login.html", &state, ctx)
}

#[derive(Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if let Some(user) = db
        .get_user_by_email(&params.email)
        .map_err(|err| log_error(err, "Database error"))?
    {
        if bcrypt::verify(&params.password, &user.password_hash)
            .map_err(|err| log_error(err, "Verification error"))?
        {
            id.remember(user.id.to_string());
            return Ok(redirect("/"));
        }
    }
    Ok(redirect("/login?wrong_password"))
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    id.forget();
    Ok(redirect("/login?logout"))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/search", web::get().to(search))
        .route("/favorites", web::get().to(favorites))
        .route("/movies/{id}/favorite", web::post().to(toggle_favorite))
        .route("/signup", web::get().to(signup))
        .route("/signup", web::post().to(signup_post))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/logout", web::get().to(logout));
}

fn startup_error<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "favflix=debug,actix_web=info");
    }
    env_logger::init();

    let config = Config::load().map_err(startup_error)?;
    let tera = tera::Tera::new(&config.templates).map_err(startup_error)?;
    let db = match &config.db_path {
        Some(path) => sled::open(path),
        None => sled::Config::new().temporary(true).open(),
    }
    .map_err(startup_error)?;
    if config.seed {
        let count = seed::seed(&db).map_err(startup_error)?;
        info!("Seeded {} movies", count);
    }

    let session_key = config.session_key;
    info!("Listening on {}", config.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&session_key)
                    .name("auth-cookie")
                    .secure(false),
            ))
            .data(tera.clone())
            .data(db.clone())
            .configure(routes)
    })
    .bind(config.bind.as_str())?
    .run()
    .await
}
