//! Character Movement Server Library
//!
//! A headless bevy host for the movement core:
//! - Authoritative server agents fed by received moves
//! - Predicting client agents driven by scripted input
//! - A seeded in-memory link with latency, jitter and loss
//! - A seeded arena with steps, ramps, water and moving platforms
//! - Session statistics with a deterministic run fingerprint

pub mod arena;
pub mod client;
pub mod components;
pub mod config;
pub mod error;
pub mod link;
pub mod server;
pub mod stats;

use bevy::prelude::*;

use movement_core::config::MovementSettings;
use movement_core::{CharacterMovement, ClientPredictionData, MovementScene, ServerPredictionData};

use components::{
    AgentId, Authority, ClientConnection, MovingPlatforms, Predicted, ScriptedInput, ServerConnection, SimClock,
};

pub use config::HostConfig;
pub use error::{HostError, HostResult};
pub use link::{link_pair, LinkConfig, LinkError};
pub use stats::SessionStats;

/// Ordering of one host frame
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostSet {
    /// Clock and world motion
    Advance,
    /// Client input and prediction
    Predict,
    /// Server replay of received moves
    Authorize,
    /// Client handling of answers
    Reconcile,
    Report,
}

pub struct MovementHostPlugin {
    pub config: HostConfig,
}

impl Plugin for MovementHostPlugin {
    fn build(&self, app: &mut App) {
        let (scene, platforms) = arena::build_arena(self.config.seed, self.config.moving_platforms);
        app.insert_resource(self.config.clone())
            .insert_resource(scene)
            .insert_resource(MovingPlatforms(platforms))
            .insert_resource(SimClock::new(self.config.delta_time()))
            .init_resource::<SessionStats>()
            .configure_sets(
                Update,
                (
                    HostSet::Advance,
                    HostSet::Predict,
                    HostSet::Authorize,
                    HostSet::Reconcile,
                    HostSet::Report,
                )
                    .chain(),
            )
            .add_systems(Startup, spawn_agents)
            .add_systems(Update, (advance_clock, move_platforms).chain().in_set(HostSet::Advance))
            .add_systems(Update, client::predict_and_send.in_set(HostSet::Predict))
            .add_systems(Update, server::receive_client_moves.in_set(HostSet::Authorize))
            .add_systems(Update, client::receive_server_answers.in_set(HostSet::Reconcile))
            .add_systems(Update, server::record_frame_stats.in_set(HostSet::Report));
    }
}

/// Validated headless app ready to be stepped with [`App::update`]
pub fn build_app(config: HostConfig) -> HostResult<App> {
    config.validate()?;
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(movement_core::logging::LoggingPlugin {
            config: config.settings.tracing.clone(),
        })
        .add_plugins(MovementHostPlugin { config });
    Ok(app)
}

/// Steps the app `frames` times and returns the stats so far
pub fn run_frames(app: &mut App, frames: u64) -> SessionStats {
    for _ in 0..frames {
        app.update();
    }
    app.world().resource::<SessionStats>().clone()
}

fn spawn_agents(mut commands: Commands, config: Res<HostConfig>, scene: Res<MovementScene>) {
    let ctx = scene.context();
    let MovementSettings { movement, network, .. } = &config.settings;
    let standing_height = movement.capsule_half_height + 2.15;

    for index in 0..config.agents {
        let id = AgentId(index);
        let link_config = LinkConfig {
            seed: config.link.seed.wrapping_add(u64::from(index)),
            ..config.link.clone()
        };
        let (client_end, server_end) = match link_pair(&link_config) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(agent = index, %err, "link setup failed, agent skipped");
                continue;
            }
        };

        let location = arena::spawn_location(index, config.agents, standing_height);
        let mut predicted = CharacterMovement::new(movement.clone(), location);
        predicted.set_default_movement_mode(&ctx);
        let authoritative = predicted.clone();

        commands.spawn((
            Predicted,
            id,
            predicted,
            ClientPredictionData::new(network.clone()),
            ScriptedInput::new(config.seed ^ (u64::from(index) << 32)),
            ClientConnection(client_end),
        ));
        commands.spawn((
            Authority,
            id,
            authoritative,
            ServerPredictionData::new(network.clone()),
            ServerConnection(server_end),
        ));
        tracing::info!(agent = index, ?location, "spawned agent pair");
    }
}

fn advance_clock(mut clock: ResMut<SimClock>) {
    clock.frame += 1;
}

fn move_platforms(clock: Res<SimClock>, mut scene: ResMut<MovementScene>, mut platforms: ResMut<MovingPlatforms>) {
    arena::drive_platforms(&mut scene, &mut platforms.0, clock.now(), clock.delta_time);
}
