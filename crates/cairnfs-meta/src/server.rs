//! TCP listener answering control frames from storage nodes.

use std::sync::Arc;

use cairnfs_transport::{
    ControlMessage, ErrorReply, TcpConnection, TcpTransport, TcpTransportConfig, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::service::ControlPlane;

/// Accepts connections until `shutdown` turns true, serving each on its own task.
pub async fn serve(
    listener: TcpListener,
    plane: Arc<ControlPlane>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let transport = TcpTransport::new(TcpTransportConfig::default());
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "control listener started");
    }

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            accepted = transport.accept(&listener) => {
                match accepted {
                    Ok(conn) => {
                        let plane = plane.clone();
                        tokio::spawn(async move {
                            handle_connection(conn, plane).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("control listener stopped");
    Ok(())
}

async fn handle_connection(conn: TcpConnection, plane: Arc<ControlPlane>) {
    let peer = conn.peer_addr().to_string();
    tracing::debug!(peer = %peer, "connection accepted");

    loop {
        let frame = match conn.recv_frame().await {
            Ok(frame) => frame,
            Err(TransportError::ConnectionReset) => break,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "dropping connection on bad frame");
                break;
            }
        };

        let reply = match ControlMessage::from_frame(&frame) {
            Ok(msg) => plane.handle_message(msg),
            Err(e) => ControlMessage::Error(ErrorReply {
                errno: libc::EINVAL,
                message: e.to_string(),
            }),
        };
        if frame.is_one_way() {
            continue;
        }

        let sent = match reply.to_response(&frame) {
            Ok(response) => conn.send_frame(&response).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!(peer = %peer, error = %e, "failed to send reply");
            break;
        }
    }
    tracing::debug!(peer = %peer, "connection closed");
}
