//! A single movie card: a summary that expands into a detail panel on click
//! and a button that favorites or unfavorites the movie.
//!
//! The card owns its view state. It never touches the favorites store
//! directly; it reads a snapshot through its props and reports changes
//! through the two store callbacks.

use crate::history::History;
use crate::model::*;
use crate::store::{map_dispatch_to_props, Callback, Dispatch, StateProps};
use serde::Serialize;

pub const SIGNUP_PATH: &str = "/signup";
pub const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

pub struct CardProps<'a> {
    pub movie: Movie,
    pub favorites: Vec<Movie>,
    pub user: Option<User>,
    pub history: &'a dyn History,
    pub remove_favorite_from_store: Callback<'a>,
    pub add_favorite_to_store: Callback<'a>,
}

impl<'a> CardProps<'a> {
    /// Props for `movie` wired to a store's state and dispatch.
    pub fn connect<D: Dispatch + ?Sized>(
        movie: Movie,
        state: StateProps,
        dispatch: &'a D,
        history: &'a dyn History,
    ) -> CardProps<'a> {
        let dispatch_props = map_dispatch_to_props(dispatch);
        CardProps {
            movie,
            favorites: state.favorites,
            user: Some(state.user),
            history,
            remove_favorite_from_store: dispatch_props.remove_favorite_from_store,
            add_favorite_to_store: dispatch_props.add_favorite_to_store,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardState {
    pub toggle_info: bool,
    pub favorite: bool,
}

#[derive(Debug, Default)]
pub struct ClickEvent {
    propagation_stopped: bool,
}

impl ClickEvent {
    pub fn new() -> ClickEvent {
        ClickEvent::default()
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Article,
    FavoriteButton,
}

pub struct Card<'a> {
    props: CardProps<'a>,
    state: CardState,
    mounted: bool,
}

impl<'a> Card<'a> {
    pub fn new(props: CardProps<'a>) -> Card<'a> {
        Card {
            props,
            state: CardState::default(),
            mounted: false,
        }
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    /// Replaces the props. The view state is kept and not resynchronized.
    #[cfg(test)]
    pub fn set_props(&mut self, props: CardProps<'a>) {
        self.props = props;
    }

    /// Synchronizes `favorite` with the favorites snapshot. Only the first
    /// call has an effect.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        if self.is_in_favorites() {
            self.state = CardState {
                favorite: true,
                ..self.state
            };
        }
    }

    // Compares whole records, not just `movie_id`.
    fn is_in_favorites(&self) -> bool {
        self.props.favorites.contains(&self.props.movie)
    }

    /// Click handler of the root article.
    pub fn toggle_info(&mut self, event: &mut ClickEvent) {
        if event.is_propagation_stopped() {
            return;
        }
        self.state = CardState {
            toggle_info: !self.state.toggle_info,
            ..self.state
        };
    }

    /// Click handler of the favorite button.
    pub fn toggle_favorite(&mut self, event: &mut ClickEvent) {
        event.stop_propagation();
        let authenticated = self
            .props
            .user
            .as_ref()
            .map_or(false, User::is_authenticated);
        if !authenticated {
            self.props.history.push(SIGNUP_PATH);
            return;
        }
        let movie = self.props.movie.clone();
        if self.is_in_favorites() {
            (self.props.remove_favorite_from_store)(movie);
        } else {
            (self.props.add_favorite_to_store)(movie);
        }
        self.state = CardState {
            favorite: !self.state.favorite,
            ..self.state
        };
    }

    /// Delivers a click to `target` and lets it bubble up to the article.
    pub fn click(&mut self, target: ClickTarget) {
        let mut event = ClickEvent::new();
        if target == ClickTarget::FavoriteButton {
            self.toggle_favorite(&mut event);
        }
        self.toggle_info(&mut event);
    }

    pub fn class_name(&self) -> &'static str {
        if self.state.toggle_info {
            "show"
        } else {
            "hide"
        }
    }

    /// `toggle_href` is where a click on the article leads.
    pub fn render(&self, tera: &tera::Tera, toggle_href: &str) -> tera::Result<String> {
        let mut ctx = tera::Context::new();
        ctx.insert("toggle_href", toggle_href);
        ctx.insert("movie", &self.props.movie);
        ctx.insert("state", &self.state);
        ctx.insert("class", self.class_name());
        ctx.insert(
            "poster_url",
            &format!("{}{}", POSTER_BASE_URL, self.props.movie.poster_path),
        );
        tera.render("card.html", &ctx)
    }
}
