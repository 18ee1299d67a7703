//! Server half: replays received moves authoritatively and answers each one.

use bevy::prelude::*;

use movement_core::{CharacterMovement, MovementScene, ServerPredictionData};

use crate::components::{AgentId, Authority, Predicted, ServerConnection, SimClock};
use crate::stats::SessionStats;

pub fn receive_client_moves(
    clock: Res<SimClock>,
    scene: Res<MovementScene>,
    mut stats: ResMut<SessionStats>,
    mut query: Query<
        (&AgentId, &mut CharacterMovement, &mut ServerPredictionData, &ServerConnection),
        With<Authority>,
    >,
) {
    let ctx = scene.context();
    let now = clock.now();
    for (id, mut movement, mut authority, connection) in &mut query {
        for message in connection.0.receive(clock.link_time()) {
            authority.receive(&mut movement, &message, now, &ctx);
            let Some(answer) = authority.send_client_adjustment() else {
                continue;
            };
            match connection.0.send(clock.link_time(), &answer) {
                Ok(size) => {
                    stats.messages_down += 1;
                    stats.bytes_down += size as u64;
                }
                Err(err) => {
                    stats.send_errors += 1;
                    tracing::warn!(agent = id.0, %err, "answer not sent");
                }
            }
        }
    }
}

/// Measures drift between each predicted agent and its authority and
/// folds the authoritative state into the run fingerprint
pub fn record_frame_stats(
    clock: Res<SimClock>,
    mut stats: ResMut<SessionStats>,
    predicted: Query<(&AgentId, &CharacterMovement), (With<Predicted>, Without<Authority>)>,
    authoritative: Query<(&AgentId, &CharacterMovement), (With<Authority>, Without<Predicted>)>,
) {
    let mut servers: Vec<(AgentId, &CharacterMovement)> =
        authoritative.iter().map(|(id, movement)| (*id, movement)).collect();
    servers.sort_by_key(|(id, _)| *id);

    let mut worst: f32 = 0.0;
    for (id, client) in &predicted {
        if let Ok(index) = servers.binary_search_by_key(id, |(server_id, _)| *server_id) {
            worst = worst.max(client.location.distance(servers[index].1.location));
        }
    }
    let digests: Vec<u64> = servers.iter().map(|(_, movement)| movement.state_digest()).collect();

    stats.frames = clock.frame;
    stats.record_divergence(worst);
    stats.final_divergence = worst;
    stats.chain_digests(&digests);
}
