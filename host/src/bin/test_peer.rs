use clap::Parser;
use host::config::PrefixOrder;
use host::mesh::{Mesh, SimpleMeshFormat};
use log::{error, info, warn};
use rand::Rng;
use shared::{FrameAssembler, ObjectType, Packet, Pose, SizeOrder, TrackedPose, Vector3};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

/// Replays scripted traffic against a running host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host stream transport address
    #[arg(short = 's', long, default_value = "127.0.0.1:45000")]
    stream: SocketAddr,

    /// Host event transport address
    #[arg(short = 'e', long, default_value = "127.0.0.1:46001")]
    events: SocketAddr,

    /// Size prefix order expected by the host's stream transport
    #[arg(long, value_enum, default_value = "swapped")]
    size_order: PrefixOrder,

    /// Also act as the head-mounted client's reverse channel on this address
    #[arg(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Pause between packets in milliseconds
    #[arg(short = 'd', long, default_value = "100")]
    delay_ms: u64,

    /// How long to keep listening after the script finishes, in seconds
    #[arg(long, default_value = "2")]
    linger_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let delay = Duration::from_millis(args.delay_ms);

    if let Some(addr) = args.listen {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for the reverse channel on {}", addr);
        tokio::spawn(log_reverse_channel(listener));
    }

    run_stream_script(args.stream, args.size_order.into(), delay).await?;
    run_event_script(args.events, delay).await?;

    if args.listen.is_some() {
        info!("Script finished, listening for {}s more", args.linger_secs);
        sleep(Duration::from_secs(args.linger_secs)).await;
    }

    info!("Test peer finished");
    Ok(())
}

async fn send(
    stream: &mut TcpStream,
    order: SizeOrder,
    packet: &Packet,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Sending {:?}", packet.flag());
    stream.write_all(&packet.encode_with(order)?).await?;
    Ok(())
}

/// Plays the head-mounted device: text, an object's life cycle, camera and a mesh
async fn run_stream_script(
    addr: SocketAddr,
    order: SizeOrder,
    delay: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    info!("Connected to stream transport at {}", addr);

    let id = rand::thread_rng().gen_range(1..=i32::MAX);

    send(
        &mut stream,
        order,
        &Packet::Text {
            message: "hello from test peer".to_string(),
        },
    )
    .await?;
    sleep(delay).await;

    send(
        &mut stream,
        order,
        &Packet::ObjectCreate {
            pose: Pose::new(Vector3::new(0.0, 1.0, 2.0), Vector3::ZERO),
            object_type: ObjectType::Cube,
            id,
        },
    )
    .await?;
    sleep(delay).await;

    for step in 1..=5 {
        let angle = step as f32 * 30.0;
        let pose = Pose::new(
            Vector3::new(step as f32 * 0.2, 1.0, 2.0),
            Vector3::new(0.0, angle, 0.0),
        );
        send(&mut stream, order, &Packet::ObjectMove { pose, id }).await?;
        sleep(delay).await;
    }

    send(
        &mut stream,
        order,
        &Packet::Camera {
            pose: Pose::new(Vector3::new(0.0, 2.5, -1.0), Vector3::new(20.0, 180.0, 0.0)),
        },
    )
    .await?;

    let floor = Mesh {
        vertices: vec![
            Vector3::new(-1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(-1.0, 0.0, 1.0),
        ],
        triangles: vec![0, 1, 2, 0, 2, 3],
    };
    send(
        &mut stream,
        order,
        &Packet::Mesh {
            data: SimpleMeshFormat::encode(&[floor]),
        },
    )
    .await?;
    sleep(delay).await;

    send(&mut stream, order, &Packet::Delete { id }).await?;
    sleep(delay).await;

    stream.shutdown().await?;
    Ok(())
}

/// Plays a controller peer: announce a headset and two controllers, move them, leave
async fn run_event_script(addr: SocketAddr, delay: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    info!("Connected to event transport at {}", addr);

    let base = rand::thread_rng().gen_range(1..=i32::MAX - 3);
    let ids = [base, base + 1, base + 2];
    send(
        &mut stream,
        SizeOrder::Little,
        &Packet::ViveCreate {
            hmd_id: ids[0],
            left_id: ids[1],
            right_id: ids[2],
        },
    )
    .await?;
    sleep(delay).await;

    for step in 0..10 {
        let sway = (step as f32 / 3.0).sin() * 0.1;
        let devices = [
            TrackedPose {
                pose: Pose::new(Vector3::new(sway, 1.7, 0.0), Vector3::ZERO),
                id: ids[0],
            },
            TrackedPose {
                pose: Pose::new(Vector3::new(-0.3 + sway, 1.1, 0.3), Vector3::ZERO),
                id: ids[1],
            },
            TrackedPose {
                pose: Pose::new(Vector3::new(0.3 + sway, 1.1, 0.3), Vector3::ZERO),
                id: ids[2],
            },
        ];

        // Split each frame in two writes to exercise reassembly
        let frame = Packet::ViveMove { devices }.encode()?;
        let (head, tail) = frame.split_at(frame.len() / 2);
        stream.write_all(head).await?;
        stream.flush().await?;
        stream.write_all(tail).await?;
        sleep(delay).await;
    }

    info!("Disconnecting controller peer");
    stream.shutdown().await?;
    Ok(())
}

async fn log_reverse_channel(listener: TcpListener) {
    let (mut socket, addr) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            error!("Reverse channel accept failed: {}", e);
            return;
        }
    };
    info!("Host connected back from {}", addr);

    let mut assembler = FrameAssembler::new(SizeOrder::Little);
    let mut buffer = [0u8; 4096];

    loop {
        let len = match socket.read(&mut buffer).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => {
                error!("Reverse channel read failed: {}", e);
                break;
            }
        };

        match assembler.push(&buffer[..len]) {
            Ok(bodies) => {
                for body in bodies {
                    match Packet::decode(&body) {
                        Ok(packet) => info!("Received {:?}", packet),
                        Err(e) => warn!("Undecodable packet: {}", e),
                    }
                }
            }
            Err(e) => {
                error!("Reverse channel framing broke: {}", e);
                break;
            }
        }
    }

    info!("Reverse channel closed");
}
