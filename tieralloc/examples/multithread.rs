use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tieralloc::{MemoryConfig, MemorySystem};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Particle {
    pos: [f32; 3],
    vel: [f32; 3],
}

// pool slots cross threads by address
struct Slot(usize);

fn main() -> tieralloc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let sys = Arc::new(MemorySystem::new(
        MemoryConfig::default().heap_size(8 << 20).linear_region_size(64 << 10),
    )?);
    println!("[+] hello from main");

    let (tx, rx) = mpsc::channel::<Slot>();

    let producer = {
        let sys = sys.clone();
        thread::spawn(move || -> tieralloc::Result<()> {
            println!("[+] hello from producer");
            for i in 0..1000 {
                let f = i as f32;
                let p = sys.pool_allocate(
                    Particle {
                        pos: [f, 0.0, 0.0],
                        vel: [0.0, f, 0.0],
                    },
                    "particle",
                )?;
                // scratch that only lives for this step
                if sys.linear_allocate(256, 16, "step scratch").is_none() {
                    tracing::warn!(step = i, "linear region exhausted");
                }
                if tx.send(Slot(p.as_ptr() as usize)).is_err() {
                    tracing::error!(step = i, "consumer hung up");
                    unsafe { sys.pool_free(p)? };
                    break;
                }
                if i % 100 == 99 {
                    sys.linear_reset();
                }
            }
            println!("producer end");
            Ok(())
        })
    };

    let consumer = {
        let sys = sys.clone();
        thread::spawn(move || -> tieralloc::Result<f32> {
            println!("[+] hello from consumer");
            let mut sum = 0.0;
            for Slot(addr) in rx {
                if let Some(p) = std::ptr::NonNull::new(addr as *mut Particle) {
                    let particle = unsafe { p.as_ref() };
                    sum += particle.pos[0] + particle.vel[1];
                    unsafe { sys.pool_free(p)? };
                }
            }
            println!("consumer end");
            Ok(sum)
        })
    };

    let blob = sys.heap_allocate(4096, 64, "level data")?;

    if let Ok(Err(e)) = producer.join() {
        return Err(e);
    }
    let sum = match consumer.join() {
        Ok(result) => result?,
        Err(_) => 0.0,
    };
    println!("checksum {}", sum);

    print!("{}", sys.report());
    sys.heap_free(blob)?;
    sys.heap().check_invariants()?;
    println!("main end");
    Ok(())
}
