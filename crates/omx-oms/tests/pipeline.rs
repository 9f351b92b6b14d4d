//! End-to-end tests of the submission pipeline and reconciliation
//! engine against the recording protocol-engine double.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use rust_decimal_macros::dec;

use omx_core::{
    EventTimes, Execution, Instrument, Order, OrderId, OrderType, Price, Qty, ReqId, ReqKind,
    ReqStatus, Request, SeqNum, Side, StrategyId, TimeStamp,
};
use omx_oms::{
    Amendment, CancelRejectReport, CancelReport, ConfirmReport, MassCancelFilter, OmsConfig,
    OrderManager, PlaceOrder, RecordingEngine, RejectReport, ReplaceReport, RiskError, RiskManager,
    RiskOrderUpdate, SentKind, SessionRef, SessionRejectReport, Strategy, TradeReport,
};

//---------------------------------------------------------------------
// Test doubles
//---------------------------------------------------------------------

#[derive(Default)]
struct StratLog {
    confirms: u32,
    cancels: u32,
    trades: u32,
    errors: u32,
    last_error_probably_filled: Option<bool>,
}

struct TestStrategy(Rc<RefCell<StratLog>>);

impl Strategy for TestStrategy {
    fn on_confirm(&mut self, _req: &Request) -> anyhow::Result<()> {
        self.0.borrow_mut().confirms += 1;
        Ok(())
    }

    fn on_cancel(
        &mut self,
        _order: &Order,
        _exch: Option<TimeStamp>,
        _recv: TimeStamp,
    ) -> anyhow::Result<()> {
        self.0.borrow_mut().cancels += 1;
        Ok(())
    }

    fn on_own_trade(&mut self, _exec: &Execution) -> anyhow::Result<()> {
        self.0.borrow_mut().trades += 1;
        Ok(())
    }

    fn on_order_error(
        &mut self,
        _req: &Request,
        _code: i32,
        _text: &str,
        probably_filled: bool,
        _exch: Option<TimeStamp>,
        _recv: TimeStamp,
    ) -> anyhow::Result<()> {
        let mut log = self.0.borrow_mut();
        log.errors += 1;
        log.last_error_probably_filled = Some(probably_filled);
        Ok(())
    }
}

#[derive(Default)]
struct RiskLog {
    bookings: u32,
    unwinds: u32,
    trades: u32,
    reject_next: bool,
}

struct TestRisk(Rc<RefCell<RiskLog>>);

impl RiskManager for TestRisk {
    fn on_order(&mut self, update: &RiskOrderUpdate<'_>) -> Result<(), RiskError> {
        let mut log = self.0.borrow_mut();
        if update.is_real {
            if log.reject_next {
                return Err(RiskError::LimitBreached("test limit".into()));
            }
            log.bookings += 1;
        } else {
            log.unwinds += 1;
        }
        Ok(())
    }

    fn on_trade(&mut self, _exec: &Execution) {
        self.0.borrow_mut().trades += 1;
    }
}

//---------------------------------------------------------------------
// Harness
//---------------------------------------------------------------------

struct Harness {
    oms: OrderManager,
    engine: RecordingEngine,
    strat: Rc<RefCell<StratLog>>,
    risk: Rc<RefCell<RiskLog>>,
    owner: StrategyId,
}

fn harness(config: OmsConfig, engine: RecordingEngine) -> Harness {
    let mut oms = OrderManager::new(config).unwrap();
    let owner = StrategyId::from_name("test-strat");
    let strat = Rc::new(RefCell::new(StratLog::default()));
    let risk = Rc::new(RefCell::new(RiskLog::default()));
    oms.subscribe(owner, Box::new(TestStrategy(strat.clone())));
    oms.set_risk_manager(Box::new(TestRisk(risk.clone())));
    Harness {
        oms,
        engine,
        strat,
        risk,
        owner,
    }
}

fn default_harness() -> Harness {
    harness(OmsConfig::default(), RecordingEngine::new())
}

fn instrument() -> Instrument {
    let mut instr = Instrument::new("EUR/USD", dec!(0.00001));
    instr.settl_date = 20260810;
    instr.pass_fee_rate = Some(dec!(0.0001));
    instr.aggr_fee_rate = Some(dec!(0.0002));
    instr
}

impl Harness {
    fn place(&mut self, qty: rust_decimal::Decimal, px: rust_decimal::Decimal) -> OrderId {
        self.oms
            .place_order(
                &mut self.engine,
                PlaceOrder {
                    owner: self.owner,
                    instrument: instrument(),
                    side: Side::Buy,
                    order_type: OrderType::Limit,
                    price: Some(Price::new(px)),
                    qty: Qty::new(qty),
                    qty_show: None,
                    qty_min: None,
                    is_aggressive: false,
                    time_in_force: None,
                    expire_date: 0,
                    event_times: EventTimes::none(),
                    batch: false,
                },
            )
            .unwrap()
    }

    fn confirm(&mut self, req: ReqId, venue_id: &str) {
        self.oms
            .on_confirmed(
                &mut self.engine,
                ConfirmReport {
                    req,
                    order: None,
                    venue_id: Some(venue_id.into()),
                    md_entry_id: None,
                    price: None,
                    leaves_qty: None,
                    exch_time: None,
                    recv_time: Utc::now(),
                },
            )
            .unwrap();
    }

    fn trade(&mut self, req: ReqId, qty: rust_decimal::Decimal, exec_id: &str) -> TradeReport {
        TradeReport {
            req: Some(req),
            order: None,
            venue_id: None,
            md_entry_id: None,
            exec_id: Some(exec_id.into()),
            our_side: Some(Side::Buy),
            aggressor: Some(Side::Sell),
            orig_price: None,
            price: Price::new(dec!(1.1)),
            qty: Qty::new(qty),
            leaves_qty: None,
            filled: None,
            fee: None,
            settl_date: 0,
            exch_time: None,
            recv_time: Utc::now(),
        }
    }

    fn first_req(&self, order: OrderId) -> ReqId {
        self.oms.arena().order(order).first_req.unwrap()
    }

    fn last_req(&self, order: OrderId) -> ReqId {
        self.oms.arena().order(order).last_req.unwrap()
    }

    fn status(&self, req: ReqId) -> ReqStatus {
        self.oms.arena().request(req).status
    }
}

//---------------------------------------------------------------------
// Placement
//---------------------------------------------------------------------

#[test]
fn test_place_confirm_part_fill_then_fill() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);

    assert_eq!(h.status(req), ReqStatus::Sent);
    assert_eq!(h.engine.sent.len(), 1);
    assert_eq!(h.engine.sent[0].kind, SentKind::New);

    h.confirm(req, "V1");
    assert_eq!(h.status(req), ReqStatus::Confirmed);
    assert_eq!(h.strat.borrow().confirms, 1);

    // Partial: 40 of 100, venue confirms 60 left.
    let mut t = h.trade(req, dec!(40), "X1");
    t.leaves_qty = Some(Qty::new(dec!(60)));
    t.filled = Some(false);
    let e1 = h.oms.on_traded(&mut h.engine, t).unwrap();
    assert!(e1.is_some());
    assert_eq!(h.status(req), ReqStatus::PartFilled);
    assert_eq!(h.oms.arena().request(req).leaves_qty, Qty::new(dec!(60)));
    assert!(!h.oms.arena().order(order).inactive);
    assert_eq!(h.oms.arena().order(order).cum_filled_qty, Qty::new(dec!(40)));

    // Completion with no protocol hints: classifier decides Complete.
    let t = h.trade(req, dec!(60), "X2");
    let e2 = h.oms.on_traded(&mut h.engine, t).unwrap();
    assert!(e2.is_some());
    assert_eq!(h.status(req), ReqStatus::Filled);
    assert!(h.oms.arena().request(req).leaves_qty.is_zero());
    assert!(h.oms.arena().order(order).inactive);
    assert!(h.oms.arena().order_is_filled(order));
    assert_eq!(h.oms.arena().order(order).cum_filled_qty, Qty::new(dec!(100)));

    // leaves == qty - sum of recorded executions.
    let mut exec_sum = Qty::ZERO;
    let mut cursor = h.oms.arena().order(order).last_exec;
    while let Some(eid) = cursor {
        let e = h.oms.arena().execution(eid);
        exec_sum = exec_sum + e.qty;
        cursor = e.prev;
    }
    let r = h.oms.arena().request(req);
    assert_eq!(r.leaves_qty, r.qty - exec_sum);

    assert_eq!(h.risk.borrow().trades, 2);
    assert_eq!(h.strat.borrow().trades, 2);
}

#[test]
fn test_place_rejects_bad_qty_and_allocates_nothing() {
    let mut h = default_harness();
    let before = h.oms.state();

    let res = h.oms.place_order(
        &mut h.engine,
        PlaceOrder {
            owner: h.owner,
            instrument: instrument(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(Price::new(dec!(1.1))),
            qty: Qty::new(dec!(0)),
            qty_show: None,
            qty_min: None,
            is_aggressive: false,
            time_in_force: None,
            expire_date: 0,
            event_times: EventTimes::none(),
            batch: false,
        },
    );
    assert!(res.is_err());
    assert_eq!(h.oms.state(), before);
    assert!(h.engine.sent.is_empty());
}

#[test]
fn test_place_rounds_price_to_tick() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.100004));
    let req = h.first_req(order);
    assert_eq!(
        h.oms.arena().request(req).price,
        Some(Price::new(dec!(1.10000)))
    );
}

#[test]
fn test_iceberg_flag_set_when_show_below_qty() {
    let mut h = default_harness();
    let order = h
        .oms
        .place_order(
            &mut h.engine,
            PlaceOrder {
                owner: h.owner,
                instrument: instrument(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                price: Some(Price::new(dec!(1.1))),
                qty: Qty::new(dec!(100)),
                qty_show: Some(Qty::new(dec!(10))),
                qty_min: None,
                is_aggressive: false,
                time_in_force: None,
                expire_date: 0,
                event_times: EventTimes::none(),
                batch: false,
            },
        )
        .unwrap();
    assert!(h.oms.arena().order(order).is_iceberg);
}

#[test]
fn test_risk_rejection_aborts_placement() {
    let mut h = default_harness();
    h.risk.borrow_mut().reject_next = true;
    let before = h.oms.state();

    let res = h.oms.place_order(
        &mut h.engine,
        PlaceOrder {
            owner: h.owner,
            instrument: instrument(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(Price::new(dec!(1.1))),
            qty: Qty::new(dec!(100)),
            qty_show: None,
            qty_min: None,
            is_aggressive: false,
            time_in_force: None,
            expire_date: 0,
            event_times: EventTimes::none(),
            batch: false,
        },
    );
    assert!(res.is_err());
    assert_eq!(h.oms.state(), before);
}

//---------------------------------------------------------------------
// Cancellation
//---------------------------------------------------------------------

#[test]
fn test_cancel_lifecycle_and_idempotent_redelivery() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    let cxl = h.last_req(order);
    assert_ne!(cxl, req);
    assert_eq!(h.oms.arena().request(cxl).kind, ReqKind::Cancel);
    assert_eq!(h.status(cxl), ReqStatus::Sent);
    assert_eq!(h.oms.arena().order(order).pending_cancel, Some(cxl));

    // A second cancel is refused without touching anything.
    let before = h.oms.state();
    assert!(!h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    assert_eq!(h.oms.state(), before);

    let report = CancelReport {
        cancel_req: Some(cxl),
        orig: Some(req),
        order: Some(order),
        venue_id: Some("V1".into()),
        md_entry_id: None,
        orig_price: None,
        orig_leaves_qty: None,
        exch_time: None,
        recv_time: Utc::now(),
    };
    h.oms.on_cancelled(&mut h.engine, report.clone()).unwrap();
    assert!(h.oms.arena().order(order).inactive);
    assert!(h.oms.arena().order(order).pending_cancel.is_none());
    assert_eq!(h.status(req), ReqStatus::Cancelled);
    assert_eq!(h.status(cxl), ReqStatus::Confirmed);
    assert!(h.oms.arena().order_is_cancelled(order));
    assert_eq!(h.strat.borrow().cancels, 1);

    // Redelivery: state identical, only a warning logged.
    h.oms.on_cancelled(&mut h.engine, report).unwrap();
    assert_eq!(h.status(req), ReqStatus::Cancelled);
    assert_eq!(h.status(cxl), ReqStatus::Confirmed);
    assert_eq!(h.strat.borrow().cancels, 1);
}

#[test]
fn test_cancel_of_unsent_new_is_synchronous() {
    let mut h = default_harness();
    h.engine.active = false;
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    assert_eq!(h.status(req), ReqStatus::Indicated);

    h.engine.active = true;
    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    // No wire traffic: the indication was cancelled in place.
    assert!(h.engine.sent.is_empty());
    assert_eq!(h.status(req), ReqStatus::Cancelled);
    assert!(h.oms.arena().order(order).inactive);
    assert_eq!(h.strat.borrow().cancels, 1);
}

#[test]
fn test_cancel_overwrites_indicated_modify() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    // Target only Sent: under wait_confirm the modify stays indicated.
    assert!(h
        .oms
        .modify_order(
            &mut h.engine,
            order,
            Amendment {
                price: Some(Price::new(dec!(1.2))),
                ..Amendment::default()
            },
            false,
            EventTimes::none(),
            false,
        )
        .unwrap());
    let m = h.last_req(order);
    assert_eq!(h.oms.arena().request(m).kind, ReqKind::Modify);
    assert_eq!(h.status(m), ReqStatus::Indicated);

    // Cancelling overwrites the parked modify in place.
    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    assert_eq!(h.last_req(order), m);
    assert_eq!(h.oms.arena().request(m).kind, ReqKind::Cancel);
    assert_eq!(h.oms.arena().order(order).pending_cancel, Some(m));

    // Once the target confirms, the cancel goes out.
    h.confirm(req, "V1");
    assert_eq!(h.status(m), ReqStatus::Sent);
    assert_eq!(h.engine.sent.last().unwrap().kind, SentKind::Cancel);
}

//---------------------------------------------------------------------
// Modification
//---------------------------------------------------------------------

#[test]
fn test_modify_noop_returns_false_without_allocation() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    let before = h.oms.state();
    let changed = h
        .oms
        .modify_order(
            &mut h.engine,
            order,
            Amendment {
                price: Some(Price::new(dec!(1.1))),
                qty: Some(Qty::new(dec!(100))),
                ..Amendment::default()
            },
            false,
            EventTimes::none(),
            false,
        )
        .unwrap();
    assert!(!changed);
    assert_eq!(h.oms.state(), before);
}

#[test]
fn test_atomic_modify_replace_flow() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    assert!(h
        .oms
        .modify_order(
            &mut h.engine,
            order,
            Amendment {
                price: Some(Price::new(dec!(1.2))),
                qty: Some(Qty::new(dec!(80))),
                ..Amendment::default()
            },
            false,
            EventTimes::none(),
            false,
        )
        .unwrap());
    let m = h.last_req(order);
    assert_eq!(h.oms.arena().request(m).kind, ReqKind::Modify);
    assert_eq!(h.status(m), ReqStatus::Sent);
    assert_eq!(h.oms.arena().request(m).target, Some(req));

    h.oms
        .on_replaced(
            &mut h.engine,
            ReplaceReport {
                req: m,
                orig: Some(req),
                order: Some(order),
                venue_id: Some("V2".into()),
                orig_venue_id: Some("V1".into()),
                md_entry_id: None,
                price: None,
                leaves_qty: None,
                exch_time: None,
                recv_time: Utc::now(),
            },
        )
        .unwrap();
    assert_eq!(h.status(req), ReqStatus::Replaced);
    assert_eq!(h.status(m), ReqStatus::Confirmed);
    assert_eq!(h.strat.borrow().confirms, 2);
    assert!(!h.oms.arena().order(order).inactive);
}

#[test]
fn test_tandem_modify_keeps_order_active() {
    let cfg = OmsConfig {
        has_atomic_modify: false,
        ..OmsConfig::default()
    };
    let mut h = harness(cfg, RecordingEngine::tandem());
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    assert!(h
        .oms
        .modify_order(
            &mut h.engine,
            order,
            Amendment {
                price: Some(Price::new(dec!(1.2))),
                ..Amendment::default()
            },
            false,
            EventTimes::none(),
            false,
        )
        .unwrap());
    let nleg = h.last_req(order);
    let cleg = h.oms.arena().request(nleg).prev.unwrap();
    assert_eq!(h.oms.arena().request(cleg).kind, ReqKind::CancelLeg);
    assert_eq!(h.oms.arena().request(nleg).kind, ReqKind::NewLeg);
    // Both legs went out back-to-back with consecutive sequence
    // numbers.
    assert_eq!(h.status(cleg), ReqStatus::Sent);
    assert_eq!(h.status(nleg), ReqStatus::Sent);
    assert_eq!(h.engine.sent.last().unwrap().kind, SentKind::TandemPair);
    let cleg_seq = h.oms.arena().request(cleg).seq_num.unwrap();
    let nleg_seq = h.oms.arena().request(nleg).seq_num.unwrap();
    assert_eq!(nleg_seq, SeqNum(cleg_seq.0 + 1));

    // The cancel-leg confirmation arrives as a cancellation of the
    // target, which must become Replaced, not Cancelled.
    h.oms
        .on_cancelled(
            &mut h.engine,
            CancelReport {
                cancel_req: Some(cleg),
                orig: Some(req),
                order: Some(order),
                venue_id: Some("V1".into()),
                md_entry_id: None,
                orig_price: None,
                orig_leaves_qty: None,
                exch_time: None,
                recv_time: Utc::now(),
            },
        )
        .unwrap();
    assert_eq!(h.status(req), ReqStatus::Replaced);
    assert!(!h.oms.arena().order(order).inactive);
    assert_eq!(h.strat.borrow().cancels, 0);

    // The new leg confirms as a fresh order.
    h.confirm(nleg, "V2");
    assert_eq!(h.status(nleg), ReqStatus::Confirmed);
    assert_eq!(h.strat.borrow().confirms, 2);
}

//---------------------------------------------------------------------
// Rejection paths
//---------------------------------------------------------------------

#[test]
fn test_session_reject_of_new_fails_order() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    let seq = h.oms.arena().request(req).seq_num.unwrap();

    h.oms
        .on_session_rejected(
            &mut h.engine,
            SessionRejectReport {
                req: SessionRef::Seq(seq),
                order: None,
                reason: "MsgSeqNum too low".into(),
                exch_time: None,
                recv_time: Utc::now(),
            },
        )
        .unwrap();
    assert_eq!(h.status(req), ReqStatus::Failed);
    assert!(h.oms.arena().order(order).inactive);
    assert!(h.oms.arena().order_has_failed(order));
    assert_eq!(h.oms.arena().order(order).fail_count, 1);
    assert_eq!(h.strat.borrow().errors, 1);
    assert_eq!(h.risk.borrow().unwinds, 1);
}

#[test]
fn test_cancel_reject_infers_fill_once() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");
    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    let cxl = h.last_req(order);

    h.oms
        .on_cancel_replace_rejected(
            &mut h.engine,
            CancelRejectReport {
                req: cxl,
                orig: Some(req),
                order: Some(order),
                venue_id: None,
                filled: None,
                non_existent: Some(true),
                code: 11,
                text: "Unknown order".into(),
                exch_time: None,
                recv_time: Utc::now(),
            },
        )
        .unwrap();
    assert_eq!(h.status(cxl), ReqStatus::Failed);
    assert!(h.oms.arena().request(req).probably_filled);
    assert!(h.oms.arena().order(order).inactive);
    assert!(h.oms.arena().order(order).pending_cancel.is_none());
    // An inferred fill is not an error callback.
    assert_eq!(h.strat.borrow().errors, 0);
}

#[test]
fn test_reject_reroutes_to_cancel_reject_and_clears_marker() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");
    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    let cxl = h.last_req(order);

    // The venue reports the failed cancel through the generic
    // rejection message; explicitly denying non-existence keeps the
    // order alive and skips the inferred fill.
    h.oms
        .on_rejected(
            &mut h.engine,
            RejectReport {
                req: Some(cxl),
                seq: None,
                order: Some(order),
                non_existent: Some(false),
                code: 42,
                text: "Too late to cancel".into(),
                exch_time: None,
                recv_time: Utc::now(),
            },
        )
        .unwrap();
    assert_eq!(h.status(cxl), ReqStatus::Failed);
    assert!(!h.oms.arena().order(order).inactive);
    assert!(h.oms.arena().order(order).pending_cancel.is_none());
    assert!(!h.oms.arena().request(req).probably_filled);
    assert_eq!(h.strat.borrow().errors, 1);
    assert_eq!(h.strat.borrow().last_error_probably_filled, Some(false));
}

//---------------------------------------------------------------------
// Executions
//---------------------------------------------------------------------

#[test]
fn test_duplicate_exec_id_recorded_once() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    let mut t = h.trade(req, dec!(40), "X1");
    t.leaves_qty = Some(Qty::new(dec!(60)));
    t.filled = Some(false);
    assert!(h.oms.on_traded(&mut h.engine, t.clone()).unwrap().is_some());
    t.recv_time = Utc::now();
    assert!(h.oms.on_traded(&mut h.engine, t).unwrap().is_none());

    assert_eq!(h.oms.arena().order(order).cum_filled_qty, Qty::new(dec!(40)));
    assert_eq!(h.risk.borrow().trades, 1);
    assert_eq!(h.strat.borrow().trades, 1);
}

#[test]
fn test_trade_fee_estimated_from_instrument() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");

    // Aggressor is the other side: passive fill, passive rate.
    let t = h.trade(req, dec!(100), "X1");
    let exec_id = h.oms.on_traded(&mut h.engine, t).unwrap().unwrap();
    let exec = h.oms.arena().execution(exec_id);
    assert_eq!(exec.fee, Some(Qty::new(dec!(100) * dec!(1.1) * dec!(0.0001))));
    assert!(h.oms.arena().order(order).inactive);
}

//---------------------------------------------------------------------
// Throttling and indications
//---------------------------------------------------------------------

#[test]
fn test_throttled_placements_queue_and_drain() {
    let cfg = OmsConfig {
        max_reqs_per_window: 2,
        throttle_window_secs: 1,
        ..OmsConfig::default()
    };
    let mut h = harness(cfg, RecordingEngine::new());

    let o1 = h.place(dec!(10), dec!(1.1));
    let o2 = h.place(dec!(10), dec!(1.1));
    let o3 = h.place(dec!(10), dec!(1.1));

    assert_eq!(h.status(h.first_req(o1)), ReqStatus::Sent);
    assert_eq!(h.status(h.first_req(o2)), ReqStatus::Sent);
    assert_eq!(h.status(h.first_req(o3)), ReqStatus::Indicated);
    assert_eq!(h.oms.pending_indications(), 1);

    // Let the window age out, then retry on the timer.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    h.oms.on_timer(&mut h.engine).unwrap();
    assert_eq!(h.status(h.first_req(o3)), ReqStatus::Sent);
    assert_eq!(h.oms.pending_indications(), 0);
    assert_eq!(h.engine.sent.len(), 3);
}

#[test]
fn test_dependent_released_on_target_confirmation() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);

    // Cancel a merely-sent order: parked behind the confirmation.
    assert!(h
        .oms
        .cancel_order(&mut h.engine, order, EventTimes::none(), false)
        .unwrap());
    let cxl = h.last_req(order);
    assert_eq!(h.status(cxl), ReqStatus::Indicated);

    h.confirm(req, "V1");
    // Event-driven release, no timer involved.
    assert_eq!(h.status(cxl), ReqStatus::Sent);
}

#[test]
fn test_request_chain_ids_strictly_increase() {
    let mut h = default_harness();
    let order = h.place(dec!(100), dec!(1.1));
    let req = h.first_req(order);
    h.confirm(req, "V1");
    for px in [dec!(1.2), dec!(1.3)] {
        assert!(h
            .oms
            .modify_order(
                &mut h.engine,
                order,
                Amendment {
                    price: Some(Price::new(px)),
                    ..Amendment::default()
                },
                false,
                EventTimes::none(),
                false,
            )
            .unwrap());
        let m = h.last_req(order);
        h.oms
            .on_replaced(
                &mut h.engine,
                ReplaceReport {
                    req: m,
                    orig: None,
                    order: Some(order),
                    venue_id: None,
                    orig_venue_id: None,
                    md_entry_id: None,
                    price: None,
                    leaves_qty: None,
                    exch_time: None,
                    recv_time: Utc::now(),
                },
            )
            .unwrap();
    }

    let mut ids = Vec::new();
    let mut cursor = h.oms.arena().order(order).first_req;
    while let Some(rid) = cursor {
        ids.push(rid);
        cursor = h.oms.arena().request(rid).next;
    }
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

//---------------------------------------------------------------------
// Mass cancel and flush
//---------------------------------------------------------------------

#[test]
fn test_emulated_mass_cancel_filters_by_side() {
    let mut h = default_harness();
    let buy = h.place(dec!(10), dec!(1.1));
    let sell = h
        .oms
        .place_order(
            &mut h.engine,
            PlaceOrder {
                owner: h.owner,
                instrument: instrument(),
                side: Side::Sell,
                order_type: OrderType::Limit,
                price: Some(Price::new(dec!(1.2))),
                qty: Qty::new(dec!(10)),
                qty_show: None,
                qty_min: None,
                is_aggressive: false,
                time_in_force: None,
                expire_date: 0,
                event_times: EventTimes::none(),
                batch: false,
            },
        )
        .unwrap();
    h.confirm(h.first_req(buy), "V1");
    h.confirm(h.first_req(sell), "V2");

    h.oms
        .cancel_all_orders(
            &mut h.engine,
            &MassCancelFilter {
                side: Some(Side::Buy),
                ..MassCancelFilter::default()
            },
        )
        .unwrap();

    assert!(h.oms.arena().order(buy).pending_cancel.is_some());
    assert!(h.oms.arena().order(sell).pending_cancel.is_none());
}

#[test]
fn test_native_mass_cancel_delegates() {
    let mut h = harness(
        OmsConfig::default(),
        RecordingEngine::new().with_native_mass_cancel(),
    );
    let order = h.place(dec!(10), dec!(1.1));
    h.confirm(h.first_req(order), "V1");

    h.oms
        .cancel_all_orders(&mut h.engine, &MassCancelFilter::default())
        .unwrap();
    assert_eq!(h.engine.mass_cancels.len(), 1);
    // No local cancel requests are installed on the native path.
    assert!(h.oms.arena().order(order).pending_cancel.is_none());
}

#[test]
fn test_flush_back_propagates_send_time() {
    let mut h = harness(
        OmsConfig::default(),
        RecordingEngine::new().with_batch_send(),
    );
    let order = h
        .oms
        .place_order(
            &mut h.engine,
            PlaceOrder {
                owner: h.owner,
                instrument: instrument(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                price: Some(Price::new(dec!(1.1))),
                qty: Qty::new(dec!(100)),
                qty_show: None,
                qty_min: None,
                is_aggressive: false,
                time_in_force: None,
                expire_date: 0,
                event_times: EventTimes::none(),
                batch: true,
            },
        )
        .unwrap();
    let req = h.first_req(order);
    assert_eq!(h.status(req), ReqStatus::Sent);
    assert!(h.oms.arena().request(req).sent_at.is_none());

    let sent_at = h.oms.flush_orders(&mut h.engine).unwrap();
    assert!(sent_at.is_some());
    assert_eq!(h.oms.arena().request(req).sent_at, sent_at);
}

//---------------------------------------------------------------------
// Persisted counters
//---------------------------------------------------------------------

#[test]
fn test_counters_resume_across_restart() {
    let mut h = default_harness();
    h.place(dec!(10), dec!(1.1));
    let state = h.oms.state();

    let mut h2 = harness(OmsConfig::default(), RecordingEngine::new());
    h2.oms = OrderManager::with_state(OmsConfig::default(), state).unwrap();
    let order = h2
        .oms
        .place_order(
            &mut h2.engine,
            PlaceOrder {
                owner: h2.owner,
                instrument: instrument(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                price: Some(Price::new(dec!(1.1))),
                qty: Qty::new(dec!(10)),
                qty_show: None,
                qty_min: None,
                is_aggressive: false,
                time_in_force: None,
                expire_date: 0,
                event_times: EventTimes::none(),
                batch: false,
            },
        )
        .unwrap();
    assert_eq!(order, OrderId(state.next_order_id));
    assert_eq!(
        h2.oms.arena().order(order).first_req,
        Some(ReqId(state.next_req_id))
    );
}
