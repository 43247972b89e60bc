//! Application state, the actions that change it and the glue that hands
//! both to a [`Card`](crate::card::Card).

use crate::model::*;
use log::debug;
use serde::Serialize;
use std::cell::RefCell;

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct AppState {
    pub user: User,
    pub favorites: Vec<Movie>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddFavorite(Movie),
    RemoveFavorite(Movie),
}

pub fn add_favorite(movie: Movie) -> Action {
    Action::AddFavorite(movie)
}

pub fn remove_favorite(movie: Movie) -> Action {
    Action::RemoveFavorite(movie)
}

pub fn reduce(mut state: AppState, action: Action) -> AppState {
    match action {
        Action::AddFavorite(movie) => {
            if !state.favorites.contains(&movie) {
                state.favorites.push(movie);
            }
            state
        }
        Action::RemoveFavorite(movie) => {
            state.favorites.retain(|favorite| favorite != &movie);
            state
        }
    }
}

/// Fire-and-forget sink for actions.
pub trait Dispatch {
    fn dispatch(&self, action: Action);
}

/// Applies `actions` in order.
pub fn replay(state: AppState, actions: &[Action]) -> AppState {
    actions.iter().cloned().fold(state, reduce)
}

/// Records dispatched actions so they can be replayed against the
/// current stored state rather than the snapshot the card was built from.
#[derive(Default, Debug)]
pub struct ActionLog {
    actions: RefCell<Vec<Action>>,
}

impl ActionLog {
    pub fn new() -> ActionLog {
        ActionLog::default()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }
}

impl Dispatch for ActionLog {
    fn dispatch(&self, action: Action) {
        debug!("dispatch: {:?}", action);
        self.actions.borrow_mut().push(action);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateProps {
    pub user: User,
    pub favorites: Vec<Movie>,
}

pub fn map_state_to_props(state: &AppState) -> StateProps {
    StateProps {
        user: state.user.clone(),
        favorites: state.favorites.clone(),
    }
}

pub type Callback<'a> = Box<dyn Fn(Movie) + 'a>;

pub struct DispatchProps<'a> {
    pub remove_favorite_from_store: Callback<'a>,
    pub add_favorite_to_store: Callback<'a>,
}

pub fn map_dispatch_to_props<'a, D: Dispatch + ?Sized>(dispatch: &'a D) -> DispatchProps<'a> {
    DispatchProps {
        remove_favorite_from_store: Box::new(move |movie| dispatch.dispatch(remove_favorite(movie))),
        add_favorite_to_store: Box::new(move |movie| dispatch.dispatch(add_favorite(movie))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::tests::movie;

    #[test]
    fn state_props_are_passed_through() {
        let user = User {
            id: 2,
            name: Some("Tim".to_owned()),
            email: "foo@barr".to_owned(),
            password_hash: "oops".to_owned(),
        };
        let state = AppState {
            user: user.clone(),
            favorites: vec![],
        };
        assert_eq!(
            map_state_to_props(&state),
            StateProps {
                user,
                favorites: vec![]
            }
        );
    }

    #[test]
    fn remove_favorite_from_store_dispatches() {
        let dispatch = ActionLog::new();
        let props = map_dispatch_to_props(&dispatch);
        (props.remove_favorite_from_store)(movie(1, "Heat", ""));
        assert_eq!(
            dispatch.actions(),
            vec![remove_favorite(movie(1, "Heat", ""))]
        );
    }

    #[test]
    fn add_favorite_to_store_dispatches() {
        let dispatch = ActionLog::new();
        let props = map_dispatch_to_props(&dispatch);
        (props.add_favorite_to_store)(movie(1, "Heat", ""));
        assert_eq!(
            dispatch.actions(),
            vec![add_favorite(movie(1, "Heat", ""))]
        );
    }

    #[test]
    fn adding_twice_keeps_one_entry() {
        let state = reduce(AppState::default(), add_favorite(movie(1, "Heat", "")));
        let state = reduce(state, add_favorite(movie(1, "Heat", "")));
        assert_eq!(state.favorites, vec![movie(1, "Heat", "")]);
    }

    #[test]
    fn remove_keeps_order_of_the_rest() {
        let state = AppState {
            user: User::default(),
            favorites: vec![movie(1, "a", ""), movie(2, "b", ""), movie(3, "c", "")],
        };
        let state = reduce(state, remove_favorite(movie(2, "b", "")));
        assert_eq!(state.favorites, vec![movie(1, "a", ""), movie(3, "c", "")]);
    }

    #[test]
    fn replay_applies_logged_actions_in_order() {
        let log = ActionLog::new();
        log.dispatch(add_favorite(movie(1, "a", "")));
        log.dispatch(add_favorite(movie(2, "b", "")));
        log.dispatch(remove_favorite(movie(1, "a", "")));
        let state = replay(AppState::default(), &log.actions());
        assert_eq!(state.favorites, vec![movie(2, "b", "")]);
    }
}
