//! 목적지 선택
//!
//! 데이터센터 지역성과 가중치를 고려해 요청 후보 목록을 만듭니다.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::data_center::{DataCenter, Destination};

/// 선택 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// 최대 후보 수
    pub fanout: usize,
    /// 로컬 데이터센터 우선
    pub prefer_local: bool,
    /// 무작위 순서 (아니면 가중치 내림차순)
    pub randomize_order: bool,
}

impl SelectionPolicy {
    /// 새 정책 생성
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout,
            prefer_local: false,
            randomize_order: false,
        }
    }

    /// 로컬 우선 설정
    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    /// 무작위 순서 설정
    pub fn with_randomize_order(mut self, randomize: bool) -> Self {
        self.randomize_order = randomize;
        self
    }
}

/// 목적지 선택기
pub struct DestinationSelector {
    /// 난수 생성기
    rng: Mutex<StdRng>,
}

impl DestinationSelector {
    /// 새 선택기 생성
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 고정 시드 선택기 (테스트용)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// 후보 목록 선택
    ///
    /// 1. 로컬 우선이고 로컬에 살아있는 목적지가 있으면 먼저 채웁니다.
    /// 2. 남은 자리는 원격 데이터센터에서 채웁니다 (무작위 또는 가중치 순).
    /// 3. `fanout`개를 채우거나 살아있는 목적지가 바닥나면 멈춥니다.
    pub fn select(
        &self,
        data_centers: &[Arc<DataCenter>],
        policy: SelectionPolicy,
    ) -> Vec<Arc<Destination>> {
        let mut selected = Vec::with_capacity(policy.fanout);
        if policy.fanout == 0 {
            return selected;
        }

        let mut rng = self.rng.lock();

        let local = if policy.prefer_local {
            data_centers.iter().find(|dc| dc.is_local())
        } else {
            None
        };

        if let Some(local) = local {
            let mut alive = local.snapshot_alive();
            order_destinations(&mut alive, policy.randomize_order, &mut *rng);
            take_into(&mut selected, alive, policy.fanout);
        }

        let mut remotes: Vec<&Arc<DataCenter>> = data_centers
            .iter()
            .filter(|dc| !local.is_some_and(|l| Arc::ptr_eq(l, *dc)))
            .collect();

        if policy.randomize_order {
            remotes.shuffle(&mut *rng);
        } else {
            remotes.sort_by(|a, b| b.weight().total_cmp(&a.weight()));
        }

        for dc in remotes {
            if selected.len() >= policy.fanout {
                break;
            }
            let mut alive = dc.snapshot_alive();
            order_destinations(&mut alive, policy.randomize_order, &mut *rng);
            take_into(&mut selected, alive, policy.fanout);
        }

        selected
    }
}

impl Default for DestinationSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// 데이터센터 안의 목적지 정렬
fn order_destinations(destinations: &mut [Arc<Destination>], randomize: bool, rng: &mut StdRng) {
    if randomize {
        destinations.shuffle(rng);
    } else {
        // 안정 정렬이라 미측정 목적지는 추가된 순서를 유지
        destinations.sort_by(|a, b| b.weight().total_cmp(&a.weight()));
    }
}

fn take_into(selected: &mut Vec<Arc<Destination>>, candidates: Vec<Arc<Destination>>, fanout: usize) {
    let room = fanout.saturating_sub(selected.len());
    selected.extend(candidates.into_iter().take(room));
}
