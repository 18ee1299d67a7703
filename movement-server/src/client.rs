//! Client half: predicts local input, ships moves and applies server answers.

use bevy::prelude::*;

use movement_core::{CharacterMovement, ClientPredictionData, MovementScene};

use crate::components::{AgentId, ClientConnection, Predicted, ScriptedInput, SimClock};
use crate::stats::SessionStats;

/// Simulates this frame's input and sends whatever the predictor releases
pub fn predict_and_send(
    clock: Res<SimClock>,
    scene: Res<MovementScene>,
    mut stats: ResMut<SessionStats>,
    mut query: Query<
        (
            &AgentId,
            &mut CharacterMovement,
            &mut ClientPredictionData,
            &ScriptedInput,
            &ClientConnection,
        ),
        With<Predicted>,
    >,
) {
    let ctx = scene.context();
    let now = clock.now();
    for (id, mut movement, mut prediction, script, connection) in &mut query {
        let input = script.input_at(clock.frame);
        let messages = prediction.predict_move(&mut movement, &input, clock.delta_time, now, &ctx);
        for message in &messages {
            match connection.0.send(clock.link_time(), message) {
                Ok(size) => {
                    stats.messages_up += 1;
                    stats.bytes_up += size as u64;
                }
                Err(err) => {
                    stats.send_errors += 1;
                    tracing::warn!(agent = id.0, %err, "move not sent");
                }
            }
        }
    }
}

/// Applies acks and corrections, then decays the visual correction offset
pub fn receive_server_answers(
    clock: Res<SimClock>,
    scene: Res<MovementScene>,
    mut stats: ResMut<SessionStats>,
    mut query: Query<(&AgentId, &mut CharacterMovement, &mut ClientPredictionData, &ClientConnection), With<Predicted>>,
) {
    let ctx = scene.context();
    for (id, mut movement, mut prediction, connection) in &mut query {
        for answer in connection.0.receive(clock.link_time()) {
            if answer.is_correction() {
                if prediction.handle_client_message(&mut movement, &answer, &ctx) {
                    stats.corrections += 1;
                    tracing::debug!(agent = id.0, timestamp = answer.timestamp(), "applied correction");
                }
            } else {
                prediction.handle_client_message(&mut movement, &answer, &ctx);
                stats.acks += 1;
            }
        }
        let walking = movement.is_moving_on_ground();
        prediction.smooth_client_position(clock.delta_time, walking);
    }
}
