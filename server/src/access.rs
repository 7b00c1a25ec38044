//! Login and logout processing on the access pool

use crate::control::Control;
use crate::error::ServerError;
use crate::listen::ListenSocket;
use crate::user::{BaseUser, Peer};
use log::{debug, info, warn};
use shared::crypto::random_iv;
use shared::proto::{LoginRequest, ACCESS_MOVE, ACCESS_NONE, ACCESS_VIEW, LGTREQ, LOGREQ};
use shared::{KeyPair, Packet, SessionCipher};
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

pub enum AccessJob {
    Login {
        peer: Peer,
        request: Box<LoginRequest>,
    },
    Logout {
        userid: u64,
    },
}

pub(crate) fn handle_access(listen: &ListenSocket, job: AccessJob) -> Result<(), ServerError> {
    match job {
        AccessJob::Login { peer, mut request } => {
            let credentials = Credentials::take(&mut request);
            login(listen, peer, &credentials)
        }
        AccessJob::Logout { userid } => logout(listen, userid),
    }
}

/// Login fields copied out of the request, wiped on drop
struct Credentials {
    username: Zeroizing<String>,
    charname: Zeroizing<String>,
    pubkey: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Copies the fields out and scrubs the request in place
    fn take(request: &mut LoginRequest) -> Self {
        let credentials = Credentials {
            username: Zeroizing::new(request.username()),
            charname: Zeroizing::new(request.charname()),
            pubkey: Zeroizing::new(
                request
                    .pubkey_der()
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
            ),
        };
        request.username.zeroize();
        request.charname.zeroize();
        request.pubkey.zeroize();
        credentials
    }
}

/// Fresh server key pair and IV; returns the SRVKEY packet and the session
fn server_handshake(client_der: &[u8]) -> Result<(Packet, SessionCipher), ServerError> {
    let keys = KeyPair::generate();
    let iv = random_iv();
    let session = SessionCipher::establish(&keys, client_der, iv)?;
    let packet = Packet::server_key(&keys.public_der()?, iv)?;
    Ok((packet, session))
}

fn login(listen: &ListenSocket, peer: Peer, credentials: &Credentials) -> Result<(), ServerError> {
    let username = credentials.username.as_str();
    let charname = credentials.charname.as_str();
    if credentials.pubkey.is_empty() {
        warn!("Login for '{}' from {} carries no public key", username, peer);
        listen.count_rejected_login();
        return Ok(());
    }

    let database = listen.database();
    let userid = database.check_authentication(username, &credentials.pubkey)?;
    if userid == 0 {
        info!("Authentication failed for '{}' from {}", username, peer);
        listen.count_rejected_login();
        return Ok(());
    }

    if let Some(user) = listen.users().get(userid) {
        return relogin(listen, &user, peer, &credentials.pubkey);
    }

    let access = database.check_authorization(userid, charname)?;
    let control = Arc::new(Control::new(userid, access, listen.sink()));
    let user = Arc::new(BaseUser::new(userid, peer));
    user.set_control(control.clone());

    if access < ACCESS_VIEW {
        info!("User {} has no access to '{}'", userid, charname);
        user.set_pending_logout(true);
    } else {
        let skills = database.get_player_server_skills(userid, charname)?;
        debug!("User {} holds {} skills", userid, skills.len());

        if access >= ACCESS_MOVE {
            let object_id = database.get_character_objectid(userid, charname)?;
            if object_id != 0 {
                if let Err(e) = listen.zone().connect_game_object(&control, object_id) {
                    warn!("User {} could not take object {}: {}", userid, object_id, e);
                }
            }
        }
    }

    let (server_key, session) = server_handshake(&credentials.pubkey)?;
    user.set_session(session);
    listen.users().insert(user.clone());
    listen.count_login();

    let object_id = control.object_id().unwrap_or(0);
    listen.send_packets(
        &user,
        vec![server_key, Packet::ack(LOGREQ, [access, object_id, 0, 0])],
    )?;
    if object_id != 0 {
        listen.zone().announce(object_id);
    }
    Ok(())
}

/// A known user logged in again, possibly from a new address
fn relogin(
    listen: &ListenSocket,
    user: &BaseUser,
    peer: Peer,
    client_der: &[u8],
) -> Result<(), ServerError> {
    listen.users().rebind(user, peer);
    user.touch();

    let control = user.control();
    let access = control.as_ref().map_or(ACCESS_NONE, |control| control.access());
    let object_id = control
        .as_ref()
        .and_then(|control| control.object_id())
        .unwrap_or(0);
    user.set_pending_logout(access < ACCESS_VIEW);

    let (server_key, session) = server_handshake(client_der)?;
    user.set_session(session);
    info!("User {} re-established its session from {}", user.userid(), peer);

    listen.send_packets(
        user,
        vec![server_key, Packet::ack(LOGREQ, [access, object_id, 0, 0])],
    )?;
    if object_id != 0 {
        listen.zone().announce(object_id);
    }
    Ok(())
}

fn logout(listen: &ListenSocket, userid: u64) -> Result<(), ServerError> {
    let Some(user) = listen.users().get(userid) else {
        debug!("Logout for departed user {}", userid);
        return Ok(());
    };

    user.set_pending_logout(true);
    listen.users().unbind_peer(&user);
    info!("User {} logging out", userid);
    listen.send_packets(&user, vec![Packet::ack(LGTREQ, [ACCESS_NONE, 0, 0, 0])])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_scrub_request() {
        let keys = KeyPair::generate();
        let der = keys.public_der().unwrap();
        let mut request = match Packet::login("alice", "hero", &der).unwrap() {
            Packet::Login(request) => request,
            _ => panic!("Wrong packet type"),
        };

        let credentials = Credentials::take(&mut request);
        assert_eq!(credentials.username.as_str(), "alice");
        assert_eq!(credentials.charname.as_str(), "hero");
        assert_eq!(credentials.pubkey.as_slice(), der.as_slice());

        assert!(request.username.iter().all(|b| *b == 0));
        assert!(request.charname.iter().all(|b| *b == 0));
        assert!(request.pubkey.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_handshake_matches_client_side() {
        let client = KeyPair::generate();
        let (packet, server_session) = server_handshake(&client.public_der().unwrap()).unwrap();

        let client_session = match packet {
            Packet::ServerKey(key) => {
                SessionCipher::establish(&client, key.pubkey_der().unwrap(), key.iv).unwrap()
            }
            _ => panic!("Wrong packet type"),
        };
        let sealed = server_session.encrypt(b"hello").unwrap();
        assert_eq!(client_session.decrypt(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn test_bad_client_key_fails_handshake() {
        assert!(server_handshake(&[1, 2, 3]).is_err());
    }
}
